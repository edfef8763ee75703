// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit pipeline configuration section.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::duration::{parse_interval, parse_window};
use crate::error::ConfigError;

const DEFAULT_LOCAL_STORAGE_LOCATION: &str = "./data/audit-staging";
const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_BATCH_TIME_INTERVAL: Duration = Duration::from_secs(10);

/// How audit entries travel from the request path to the central store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
	/// Stage locally, drain in batches behind a checkpoint.
	#[default]
	Durable,
	/// Save each entry straight to the central store on a spawned task.
	/// Entries are lost when the store is unavailable.
	Direct,
}

impl AuditMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditMode::Durable => "durable",
			AuditMode::Direct => "direct",
		}
	}
}

impl FromStr for AuditMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"durable" => Ok(AuditMode::Durable),
			"direct" => Ok(AuditMode::Direct),
			other => Err(format!(
				"unknown audit mode '{other}', expected 'durable' or 'direct'"
			)),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AuditConfigLayer {
	pub mode: Option<AuditMode>,
	pub local_storage_location: Option<String>,
	pub node_name: Option<String>,
	pub batch_size: Option<u32>,
	pub batch_time_interval: Option<String>,
	pub staleness_duration: Option<String>,
	pub metrics_file: Option<String>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.mode.is_some() {
			self.mode = other.mode;
		}
		if other.local_storage_location.is_some() {
			self.local_storage_location = other.local_storage_location;
		}
		if other.node_name.is_some() {
			self.node_name = other.node_name;
		}
		if other.batch_size.is_some() {
			self.batch_size = other.batch_size;
		}
		if other.batch_time_interval.is_some() {
			self.batch_time_interval = other.batch_time_interval;
		}
		if other.staleness_duration.is_some() {
			self.staleness_duration = other.staleness_duration;
		}
		if other.metrics_file.is_some() {
			self.metrics_file = other.metrics_file;
		}
	}

	pub fn finalize(self) -> Result<AuditConfig, ConfigError> {
		let local_storage_location = self
			.local_storage_location
			.unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_LOCATION.to_string());
		if local_storage_location.trim().is_empty() {
			return Err(ConfigError::Validation(
				"audit.local_storage_location must not be empty".to_string(),
			));
		}

		let node_name = self
			.node_name
			.map(|n| n.trim().to_string())
			.filter(|n| !n.is_empty())
			.ok_or_else(|| {
				ConfigError::Validation(
					"audit.node_name is required (set KEEP_SERVER_AUDIT_NODE_NAME)".to_string(),
				)
			})?;

		let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
		if batch_size == 0 {
			return Err(ConfigError::Validation(
				"audit.batch_size must be at least 1".to_string(),
			));
		}

		let batch_time_interval = match self.batch_time_interval {
			Some(v) => parse_interval(&v).map_err(|message| ConfigError::InvalidValue {
				key: "audit.batch_time_interval".to_string(),
				message,
			})?,
			None => DEFAULT_BATCH_TIME_INTERVAL,
		};

		let staleness_duration = match self.staleness_duration {
			Some(v) => parse_window(&v).map_err(|message| ConfigError::InvalidValue {
				key: "audit.staleness_duration".to_string(),
				message,
			})?,
			None => TimeDelta::zero(),
		};

		let metrics_file = self
			.metrics_file
			.map(|p| p.trim().to_string())
			.filter(|p| !p.is_empty())
			.map(PathBuf::from);

		Ok(AuditConfig {
			mode: self.mode.unwrap_or_default(),
			local_storage_location: PathBuf::from(local_storage_location),
			node_name,
			batch_size,
			batch_time_interval,
			staleness_duration,
			metrics_file,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
	pub mode: AuditMode,
	/// Directory holding this node's staging database.
	pub local_storage_location: PathBuf,
	/// Stable identity of this instance; keys its checkpoint.
	pub node_name: String,
	pub batch_size: u32,
	pub batch_time_interval: Duration,
	/// Zero or negative disables stale reclamation.
	pub staleness_duration: TimeDelta,
	/// Where pipeline counters are written in the Prometheus text format,
	/// for a node exporter textfile collector.
	pub metrics_file: Option<PathBuf>,
}

impl AuditConfig {
	pub fn reclaim_enabled(&self) -> bool {
		self.staleness_duration > TimeDelta::zero()
	}
}
