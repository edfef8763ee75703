// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local, durable, append-only staging log.
//!
//! Audit entries land here synchronously on the request path and are drained
//! into the central audit store by the [`crate::BatchFlusher`]. Sequence ids are
//! assigned by SQLite (`AUTOINCREMENT`), so they are strictly increasing and
//! never reused, even after the rows holding them are deleted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;

use crate::error::{AuditError, AuditResult};

/// File name of the staging database inside the configured storage location.
pub const STAGING_DB_FILE: &str = "staging.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 4;

/// One row of the staging log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRecord {
	pub sequence_id: i64,
	/// Serialized [`crate::AuditEntry`].
	pub payload: String,
}

pub struct StagingLog {
	pool: SqlitePool,
	location: PathBuf,
}

impl StagingLog {
	/// Open (creating if needed) the staging log under `location`.
	///
	/// The directory and the table are created when missing; opening an
	/// existing log is not an error.
	#[tracing::instrument(skip(location), fields(location = %location.as_ref().display()))]
	pub async fn open(location: impl AsRef<Path>) -> AuditResult<Self> {
		let location = location.as_ref().to_path_buf();
		tokio::fs::create_dir_all(&location)
			.await
			.map_err(|source| AuditError::Io {
				path: location.clone(),
				source,
			})?;

		let options = SqliteConnectOptions::new()
			.filename(location.join(STAGING_DB_FILE))
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Full)
			.busy_timeout(BUSY_TIMEOUT);

		let pool = SqlitePoolOptions::new()
			.max_connections(MAX_CONNECTIONS)
			.connect_with(options)
			.await?;

		let log = Self { pool, location };
		log.init().await?;

		tracing::debug!("staging log opened");
		Ok(log)
	}

	async fn init(&self) -> AuditResult<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS audits (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				event TEXT NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	pub fn location(&self) -> &Path {
		&self.location
	}

	/// Durably persist one serialized event and return its sequence id.
	pub async fn append(&self, payload: &str) -> AuditResult<i64> {
		let result = sqlx::query("INSERT INTO audits (event) VALUES (?)")
			.bind(payload)
			.execute(&self.pool)
			.await?;
		Ok(result.last_insert_rowid())
	}

	/// Up to `max_count` records with sequence id strictly greater than
	/// `after_sequence_id`, ascending.
	pub async fn read_batch(
		&self,
		after_sequence_id: i64,
		max_count: u32,
	) -> AuditResult<Vec<StagedRecord>> {
		let rows = sqlx::query("SELECT id, event FROM audits WHERE id > ? ORDER BY id LIMIT ?")
			.bind(after_sequence_id)
			.bind(i64::from(max_count))
			.fetch_all(&self.pool)
			.await?;

		rows
			.into_iter()
			.map(|row| {
				Ok(StagedRecord {
					sequence_id: row.try_get("id")?,
					payload: row.try_get("event")?,
				})
			})
			.collect()
	}

	/// Delete every record with sequence id `<= max_sequence_id`.
	///
	/// Returns the number of rows removed; repeating the call is a no-op.
	pub async fn delete_up_to(&self, max_sequence_id: i64) -> AuditResult<u64> {
		let result = sqlx::query("DELETE FROM audits WHERE id <= ?")
			.bind(max_sequence_id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}

	/// Number of records currently staged.
	pub async fn len(&self) -> AuditResult<i64> {
		let row = sqlx::query("SELECT COUNT(*) AS cnt FROM audits")
			.fetch_one(&self.pool)
			.await?;
		Ok(row.try_get("cnt")?)
	}

	pub async fn is_empty(&self) -> AuditResult<bool> {
		Ok(self.len().await? == 0)
	}

	/// Release the underlying connections. Pending operations finish first.
	pub async fn close(&self) {
		self.pool.close().await;
		tracing::debug!(location = %self.location.display(), "staging log closed");
	}
}
