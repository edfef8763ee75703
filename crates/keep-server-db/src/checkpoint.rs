// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keep_server_audit::{AuditStoreError, Checkpoint, CheckpointStore};
use sqlx::{sqlite::SqlitePool, Row};

use crate::error::{DbError, Result};

pub struct CheckpointRepository {
	pool: SqlitePool,
}

impl CheckpointRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_by_node_name(&self, node_name: &str) -> Result<Option<Checkpoint>> {
		let row = sqlx::query(
			"SELECT node_name, last_flushed_sequence_id, last_modified_at \
			 FROM audit_checkpoints WHERE node_name = ?",
		)
		.bind(node_name)
		.fetch_optional(&self.pool)
		.await?;

		let Some(row) = row else {
			return Ok(None);
		};

		let modified_str: String = row.try_get("last_modified_at")?;
		let last_modified_at = DateTime::parse_from_rfc3339(&modified_str)
			.map(|dt| dt.with_timezone(&Utc))
			.map_err(|e| DbError::Internal(format!("invalid last_modified_at '{modified_str}': {e}")))?;

		Ok(Some(Checkpoint {
			node_name: row.try_get("node_name")?,
			last_flushed_sequence_id: row.try_get("last_flushed_sequence_id")?,
			last_modified_at,
		}))
	}

	#[tracing::instrument(skip(self, checkpoint), fields(node_name = %checkpoint.node_name, sequence_id = checkpoint.last_flushed_sequence_id))]
	pub async fn save(&self, checkpoint: &Checkpoint) -> Result<Checkpoint> {
		sqlx::query(
			r#"
			INSERT INTO audit_checkpoints (node_name, last_flushed_sequence_id, last_modified_at)
			VALUES (?, ?, ?)
			ON CONFLICT(node_name) DO UPDATE SET
				last_flushed_sequence_id = excluded.last_flushed_sequence_id,
				last_modified_at = excluded.last_modified_at
			"#,
		)
		.bind(&checkpoint.node_name)
		.bind(checkpoint.last_flushed_sequence_id)
		.bind(checkpoint.last_modified_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(checkpoint.clone())
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_by_node_name(&self, node_name: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM audit_checkpoints WHERE node_name = ?")
			.bind(node_name)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
impl CheckpointStore for CheckpointRepository {
	async fn find_by_node_name(
		&self,
		node_name: &str,
	) -> std::result::Result<Option<Checkpoint>, AuditStoreError> {
		Ok(CheckpointRepository::find_by_node_name(self, node_name).await?)
	}

	async fn save(&self, checkpoint: &Checkpoint) -> std::result::Result<Checkpoint, AuditStoreError> {
		Ok(CheckpointRepository::save(self, checkpoint).await?)
	}

	async fn delete_by_node_name(&self, node_name: &str) -> std::result::Result<(), AuditStoreError> {
		CheckpointRepository::delete_by_node_name(self, node_name).await?;
		Ok(())
	}
}
