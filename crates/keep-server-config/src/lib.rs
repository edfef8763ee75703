// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for Keep server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`KEEP_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use keep_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("staging under {}", config.audit.local_storage_location.display());
//! ```

pub mod duration;
pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub audit: AuditConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`KEEP_SERVER_*`)
/// 2. Config file (`/etc/keep/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let audit = layer.audit.unwrap_or_default().finalize()?;
	let database = layer.database.unwrap_or_default().finalize()?;
	let logging = layer.logging.unwrap_or_default().finalize();

	info!(
		node_name = %audit.node_name,
		mode = audit.mode.as_str(),
		local_storage_location = %audit.local_storage_location.display(),
		batch_size = audit.batch_size,
		batch_time_interval = ?audit.batch_time_interval,
		reclaim_enabled = audit.reclaim_enabled(),
		database = %database.url,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		audit,
		database,
		logging,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn test_finalize_requires_node_name() {
		let result = finalize(ServerConfigLayer::default());
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_finalize_layers_in_precedence_order() {
		let file: ServerConfigLayer = toml::from_str(
			r#"
[audit]
node_name = "from-file"
batch_size = 10

[logging]
level = "debug"
"#,
		)
		.unwrap();
		let override_layer = ServerConfigLayer {
			audit: Some(AuditConfigLayer {
				node_name: Some("from-env".to_string()),
				..Default::default()
			}),
			..Default::default()
		};

		let mut merged = ServerConfigLayer::default();
		merged.merge(file);
		merged.merge(override_layer);
		let config = finalize(merged).unwrap();

		assert_eq!(config.audit.node_name, "from-env");
		assert_eq!(config.audit.batch_size, 10);
		assert_eq!(config.audit.batch_time_interval, Duration::from_secs(10));
		assert_eq!(config.logging.level, "debug");
		assert_eq!(config.database.url, "sqlite:./keep.db");
	}
}
