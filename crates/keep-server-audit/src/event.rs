// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key carrying the correlation id between a staged record and its
/// delivered counterpart.
pub const LOG_ID_METADATA_KEY: &str = "logId";

/// A single audited operation on a project resource.
///
/// Only successful operations are audited. The entry is serialized into the
/// staging log as JSON and decoded again at flush time; it is never persisted
/// locally in any other form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
	/// Assigned by the central audit store on commit.
	#[serde(default)]
	pub id: Option<String>,
	pub project_id: String,
	/// e.g. `SECRET`, `PROJECT`, `SECRET_DATA`.
	pub resource_type: String,
	pub resource_name: String,
	/// Version of the resource the action touched, for versioned resources.
	#[serde(default)]
	pub resource_version: Option<i32>,
	/// e.g. `CREATE`, `READ`, `UPDATE`, `DELETE`.
	pub action: String,
	pub user_id: String,
	pub timestamp: DateTime<Utc>,
	#[serde(default)]
	pub metadata: HashMap<String, String>,
}

impl AuditEntry {
	pub fn builder(
		project_id: impl Into<String>,
		resource_type: impl Into<String>,
		resource_name: impl Into<String>,
	) -> AuditEntryBuilder {
		AuditEntryBuilder::new(project_id, resource_type, resource_name)
	}

	/// The `logId` injected by the flusher, if this entry has been through it.
	pub fn log_id(&self) -> Option<&str> {
		self.metadata.get(LOG_ID_METADATA_KEY).map(String::as_str)
	}
}

/// Formats the correlation key `<node>.<sequence id>.<timestamp>`.
pub fn format_log_id(node_name: &str, sequence_id: i64, timestamp: &DateTime<Utc>) -> String {
	format!(
		"{node_name}.{sequence_id}.{}",
		timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
	)
}

/// Builder for constructing audit entries with a fluent API.
#[derive(Debug, Clone)]
pub struct AuditEntryBuilder {
	project_id: String,
	resource_type: String,
	resource_name: String,
	resource_version: Option<i32>,
	action: Option<String>,
	user_id: Option<String>,
	timestamp: Option<DateTime<Utc>>,
	metadata: HashMap<String, String>,
}

impl AuditEntryBuilder {
	pub fn new(
		project_id: impl Into<String>,
		resource_type: impl Into<String>,
		resource_name: impl Into<String>,
	) -> Self {
		Self {
			project_id: project_id.into(),
			resource_type: resource_type.into(),
			resource_name: resource_name.into(),
			resource_version: None,
			action: None,
			user_id: None,
			timestamp: None,
			metadata: HashMap::new(),
		}
	}

	pub fn version(mut self, version: i32) -> Self {
		self.resource_version = Some(version);
		self
	}

	pub fn action(mut self, action: impl Into<String>) -> Self {
		self.action = Some(action.into());
		self
	}

	/// Set the user or system principal that performed the action.
	pub fn user(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	/// Set the time the action occurred. Defaults to now.
	pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}

	pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}

	pub fn build(self) -> AuditEntry {
		AuditEntry {
			id: None,
			project_id: self.project_id,
			resource_type: self.resource_type,
			resource_name: self.resource_name,
			resource_version: self.resource_version,
			action: self.action.unwrap_or_default(),
			user_id: self.user_id.unwrap_or_else(|| "SYSTEM".to_string()),
			timestamp: self.timestamp.unwrap_or_else(Utc::now),
			metadata: self.metadata,
		}
	}
}
