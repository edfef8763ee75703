// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Central database section.
//!
//! The central database hosts the audit entries of every node together with
//! their flush checkpoints. Only SQLite URLs are accepted.

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_URL: &str = "sqlite:./keep.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
	pub url: String,
	/// Shared by the drain job, the reclaimer and direct-mode saves.
	pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub max_connections: Option<u32>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.max_connections.is_some() {
			self.max_connections = other.max_connections;
		}
	}

	pub fn finalize(self) -> Result<DatabaseConfig, ConfigError> {
		let url = self.url.unwrap_or_else(|| DEFAULT_URL.to_string());
		if !url.starts_with("sqlite:") {
			return Err(ConfigError::InvalidValue {
				key: "database.url".to_string(),
				message: format!("'{url}' is not a sqlite: URL"),
			});
		}

		let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
		if max_connections == 0 {
			return Err(ConfigError::Validation(
				"database.max_connections must be at least 1".to_string(),
			));
		}

		Ok(DatabaseConfig {
			url,
			max_connections,
		})
	}
}
