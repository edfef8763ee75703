// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuditStoreError;

/// Highest staged sequence id known to be delivered to the central store,
/// per running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
	pub node_name: String,
	pub last_flushed_sequence_id: i64,
	pub last_modified_at: DateTime<Utc>,
}

impl Checkpoint {
	/// A checkpoint that has never been persisted.
	pub fn new(node_name: impl Into<String>) -> Self {
		Self {
			node_name: node_name.into(),
			last_flushed_sequence_id: 0,
			last_modified_at: Utc::now(),
		}
	}
}

/// Keyed persistence for [`Checkpoint`]s, one row per node name.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
	async fn find_by_node_name(&self, node_name: &str)
		-> Result<Option<Checkpoint>, AuditStoreError>;

	/// Insert or replace the checkpoint for `checkpoint.node_name`, exactly as given.
	async fn save(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, AuditStoreError>;

	async fn delete_by_node_name(&self, node_name: &str) -> Result<(), AuditStoreError>;
}
