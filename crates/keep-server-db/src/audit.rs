// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use keep_server_audit::{AuditEntry, AuditStoreError, CentralAuditStore};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::error::{DbError, Result};

/// Upper bound on rows returned by [`AuditEntryRepository::list_by_project`].
pub const MAX_LIST_LIMIT: i64 = 1000;

/// Central audit store backed by the `audit_entries` table.
///
/// Entries carrying a `logId` are unique on it: re-delivering an entry that
/// was already committed leaves the stored row as it is and returns it with
/// the id it was first committed under.
///
/// Timestamps are stored as fixed-width RFC 3339 text (nanosecond precision)
/// so that ordering by the column is chronological.
pub struct AuditEntryRepository {
	pool: SqlitePool,
}

impl AuditEntryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, entry), fields(project_id = %entry.project_id))]
	pub async fn save(&self, entry: AuditEntry) -> Result<AuditEntry> {
		insert_entry(&self.pool, entry).await
	}

	/// Insert every entry in one transaction.
	#[tracing::instrument(skip(self, entries), fields(count = entries.len()))]
	pub async fn save_all(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEntry>> {
		let mut tx = self.pool.begin().await?;
		let mut saved = Vec::with_capacity(entries.len());
		for entry in entries {
			saved.push(insert_entry(&mut *tx, entry).await?);
		}
		tx.commit().await?;
		Ok(saved)
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_by_log_id(&self, log_id: &str) -> Result<Option<AuditEntry>> {
		let row = sqlx::query(
			r#"
			SELECT id, project_id, resource_type, resource_name, resource_version,
			       action, user_id, timestamp, metadata
			FROM audit_entries
			WHERE log_id = ?
			"#,
		)
		.bind(log_id)
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(row_to_entry).transpose()
	}

	/// Entries for a project, oldest first.
	///
	/// `limit` is clamped to `1..=MAX_LIST_LIMIT`.
	#[tracing::instrument(skip(self))]
	pub async fn list_by_project(&self, project_id: &str, limit: i64) -> Result<Vec<AuditEntry>> {
		let rows = sqlx::query(
			r#"
			SELECT id, project_id, resource_type, resource_name, resource_version,
			       action, user_id, timestamp, metadata
			FROM audit_entries
			WHERE project_id = ?
			ORDER BY timestamp ASC, rowid ASC
			LIMIT ?
			"#,
		)
		.bind(project_id)
		.bind(limit.clamp(1, MAX_LIST_LIMIT))
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_entry).collect()
	}

	pub async fn count(&self) -> Result<i64> {
		let row = sqlx::query("SELECT COUNT(*) AS cnt FROM audit_entries")
			.fetch_one(&self.pool)
			.await?;
		Ok(row.get("cnt"))
	}
}

async fn insert_entry<'e, E>(executor: E, mut entry: AuditEntry) -> Result<AuditEntry>
where
	E: Executor<'e, Database = Sqlite>,
{
	let candidate_id = entry
		.id
		.clone()
		.unwrap_or_else(|| Uuid::new_v4().to_string());
	let metadata = serde_json::to_string(&entry.metadata)?;
	let now = Utc::now();

	// The no-op update makes RETURNING yield the committed id on a
	// redelivered logId.
	let row = sqlx::query(
		r#"
		INSERT INTO audit_entries (
			id, project_id, resource_type, resource_name, resource_version,
			action, user_id, timestamp, metadata, log_id, created_at
		) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
		ON CONFLICT(log_id) DO UPDATE SET log_id = excluded.log_id
		RETURNING id
		"#,
	)
	.bind(&candidate_id)
	.bind(&entry.project_id)
	.bind(&entry.resource_type)
	.bind(&entry.resource_name)
	.bind(entry.resource_version)
	.bind(&entry.action)
	.bind(&entry.user_id)
	.bind(entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true))
	.bind(&metadata)
	.bind(entry.log_id())
	.bind(now.to_rfc3339_opts(SecondsFormat::Nanos, true))
	.fetch_one(executor)
	.await?;

	entry.id = Some(row.try_get("id")?);
	Ok(entry)
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry> {
	let ts_str: String = row.try_get("timestamp")?;
	let timestamp = DateTime::parse_from_rfc3339(&ts_str)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp '{ts_str}': {e}")))?;

	let metadata_str: String = row.try_get("metadata")?;
	let metadata: HashMap<String, String> = serde_json::from_str(&metadata_str)?;

	Ok(AuditEntry {
		id: Some(row.try_get("id")?),
		project_id: row.try_get("project_id")?,
		resource_type: row.try_get("resource_type")?,
		resource_name: row.try_get("resource_name")?,
		resource_version: row.try_get("resource_version")?,
		action: row.try_get("action")?,
		user_id: row.try_get("user_id")?,
		timestamp,
		metadata,
	})
}

#[async_trait]
impl CentralAuditStore for AuditEntryRepository {
	async fn save(&self, entry: AuditEntry) -> std::result::Result<AuditEntry, AuditStoreError> {
		Ok(AuditEntryRepository::save(self, entry).await?)
	}

	async fn save_all(
		&self,
		entries: Vec<AuditEntry>,
	) -> std::result::Result<Vec<AuditEntry>, AuditStoreError> {
		Ok(AuditEntryRepository::save_all(self, entries).await?)
	}
}
