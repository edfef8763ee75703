// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Moves staged audit entries into the central audit store.
//!
//! A flush is an ordered sequence of independent operations against two
//! stores: central write, then checkpoint persist, then local delete. The
//! ordering is what keeps delivery at-least-once; there is no enclosing
//! transaction. A failure before the central write leaves everything as it
//! was. A failure after it can leave rows at or below the checkpoint in the
//! staging log, which [`BatchFlush::compact`] removes on the next drain.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{AuditError, AuditResult};
use crate::event::{format_log_id, AuditEntry, LOG_ID_METADATA_KEY};
use crate::metrics::AuditMetrics;
use crate::staging::StagingLog;
use crate::store::CentralAuditStore;

#[async_trait]
pub trait BatchFlush: Send + Sync {
	/// Deliver the next batch above the checkpoint. Returns the number of
	/// entries moved; `0` means the backlog is empty.
	async fn flush_once(&self) -> AuditResult<usize>;

	/// Delete staged rows at or below the persisted checkpoint.
	async fn compact(&self) -> AuditResult<u64>;
}

pub struct BatchFlusher {
	staging: Arc<StagingLog>,
	checkpoints: Arc<dyn CheckpointStore>,
	store: Arc<dyn CentralAuditStore>,
	metrics: Arc<AuditMetrics>,
	node_name: String,
	batch_size: u32,
}

impl BatchFlusher {
	pub fn new(
		staging: Arc<StagingLog>,
		checkpoints: Arc<dyn CheckpointStore>,
		store: Arc<dyn CentralAuditStore>,
		metrics: Arc<AuditMetrics>,
		node_name: impl Into<String>,
		batch_size: u32,
	) -> Self {
		Self {
			staging,
			checkpoints,
			store,
			metrics,
			node_name: node_name.into(),
			batch_size: batch_size.max(1),
		}
	}

	pub fn node_name(&self) -> &str {
		&self.node_name
	}

	async fn load_checkpoint(&self) -> AuditResult<Option<Checkpoint>> {
		self
			.checkpoints
			.find_by_node_name(&self.node_name)
			.await
			.map_err(AuditError::Checkpoint)
	}
}

#[async_trait]
impl BatchFlush for BatchFlusher {
	#[instrument(skip(self), fields(node = %self.node_name))]
	async fn flush_once(&self) -> AuditResult<usize> {
		let mut checkpoint = self
			.load_checkpoint()
			.await?
			.unwrap_or_else(|| Checkpoint::new(&self.node_name));
		let from = checkpoint.last_flushed_sequence_id;

		info!(
			batch_size = self.batch_size,
			checkpoint = from,
			"fetching audit entries from checkpoint"
		);
		let records = self.staging.read_batch(from, self.batch_size).await?;
		if records.is_empty() {
			return Ok(0);
		}

		let mut new_max = from;
		let mut entries = Vec::with_capacity(records.len());
		for record in records {
			let mut entry: AuditEntry =
				serde_json::from_str(&record.payload).map_err(|source| AuditError::Deserialize {
					sequence_id: record.sequence_id,
					source,
				})?;
			entry.metadata.insert(
				LOG_ID_METADATA_KEY.to_string(),
				format_log_id(&self.node_name, record.sequence_id, &entry.timestamp),
			);
			new_max = new_max.max(record.sequence_id);
			entries.push(entry);
		}

		let count = entries.len();
		self
			.store
			.save_all(entries)
			.await
			.map_err(AuditError::Store)?;
		self.metrics.entries_flushed.inc_by(count as u64);

		checkpoint.last_flushed_sequence_id = new_max;
		checkpoint.last_modified_at = Utc::now();
		self
			.checkpoints
			.save(&checkpoint)
			.await
			.map_err(AuditError::Checkpoint)?;
		self.metrics.checkpoint.set(new_max);

		self.staging.delete_up_to(new_max).await?;

		info!(count, checkpoint = new_max, "stored audit batch");
		Ok(count)
	}

	#[instrument(skip(self), fields(node = %self.node_name))]
	async fn compact(&self) -> AuditResult<u64> {
		let Some(checkpoint) = self.load_checkpoint().await? else {
			return Ok(0);
		};

		let removed = self
			.staging
			.delete_up_to(checkpoint.last_flushed_sequence_id)
			.await?;
		if removed > 0 {
			info!(
				removed,
				checkpoint = checkpoint.last_flushed_sequence_id,
				"reclaimed orphaned staged audit entries"
			);
			self.metrics.orphans_reclaimed.inc_by(removed);
		} else {
			debug!("no orphaned staged audit entries");
		}
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::AuditStoreError;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Mutex;
	use tempfile::TempDir;

	#[derive(Default)]
	struct MemoryCheckpoints {
		rows: Mutex<Vec<Checkpoint>>,
		saves: Mutex<Vec<i64>>,
		fail_save: AtomicBool,
	}

	#[async_trait]
	impl CheckpointStore for MemoryCheckpoints {
		async fn find_by_node_name(
			&self,
			node_name: &str,
		) -> Result<Option<Checkpoint>, AuditStoreError> {
			let rows = self.rows.lock().unwrap();
			Ok(rows.iter().find(|c| c.node_name == node_name).cloned())
		}

		async fn save(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, AuditStoreError> {
			if self.fail_save.load(Ordering::SeqCst) {
				return Err(AuditStoreError::Transient("checkpoint store down".to_string()));
			}
			let mut rows = self.rows.lock().unwrap();
			rows.retain(|c| c.node_name != checkpoint.node_name);
			rows.push(checkpoint.clone());
			self
				.saves
				.lock()
				.unwrap()
				.push(checkpoint.last_flushed_sequence_id);
			Ok(checkpoint.clone())
		}

		async fn delete_by_node_name(&self, node_name: &str) -> Result<(), AuditStoreError> {
			self.rows.lock().unwrap().retain(|c| c.node_name != node_name);
			Ok(())
		}
	}

	#[derive(Default)]
	struct MemoryStore {
		entries: Mutex<Vec<AuditEntry>>,
		fail: AtomicBool,
	}

	#[async_trait]
	impl CentralAuditStore for MemoryStore {
		async fn save(&self, entry: AuditEntry) -> Result<AuditEntry, AuditStoreError> {
			self.entries.lock().unwrap().push(entry.clone());
			Ok(entry)
		}

		async fn save_all(
			&self,
			entries: Vec<AuditEntry>,
		) -> Result<Vec<AuditEntry>, AuditStoreError> {
			if self.fail.load(Ordering::SeqCst) {
				return Err(AuditStoreError::Transient("store down".to_string()));
			}
			self.entries.lock().unwrap().extend(entries.iter().cloned());
			Ok(entries)
		}
	}

	struct Fixture {
		_tmp: TempDir,
		staging: Arc<StagingLog>,
		checkpoints: Arc<MemoryCheckpoints>,
		store: Arc<MemoryStore>,
		flusher: BatchFlusher,
	}

	async fn fixture(batch_size: u32) -> Fixture {
		let tmp = TempDir::new().unwrap();
		let staging = Arc::new(StagingLog::open(tmp.path()).await.unwrap());
		let checkpoints = Arc::new(MemoryCheckpoints::default());
		let store = Arc::new(MemoryStore::default());
		let flusher = BatchFlusher::new(
			Arc::clone(&staging),
			checkpoints.clone(),
			store.clone(),
			Arc::new(AuditMetrics::new().unwrap()),
			"node-a",
			batch_size,
		);
		Fixture {
			_tmp: tmp,
			staging,
			checkpoints,
			store,
			flusher,
		}
	}

	async fn stage(staging: &StagingLog, name: &str) -> i64 {
		let entry = AuditEntry::builder("proj", "SECRET", name)
			.action("READ")
			.user("alice")
			.build();
		staging
			.append(&serde_json::to_string(&entry).unwrap())
			.await
			.unwrap()
	}

	fn checkpoint_of(checkpoints: &MemoryCheckpoints) -> Option<i64> {
		checkpoints
			.rows
			.lock()
			.unwrap()
			.first()
			.map(|c| c.last_flushed_sequence_id)
	}

	#[tokio::test]
	async fn test_batch_boundaries() {
		let f = fixture(2).await;
		for i in 1..=5 {
			stage(&f.staging, &format!("s{i}")).await;
		}

		assert_eq!(f.flusher.flush_once().await.unwrap(), 2);
		assert_eq!(checkpoint_of(&f.checkpoints), Some(2));
		assert_eq!(f.flusher.flush_once().await.unwrap(), 2);
		assert_eq!(checkpoint_of(&f.checkpoints), Some(4));
		assert_eq!(f.flusher.flush_once().await.unwrap(), 1);
		assert_eq!(checkpoint_of(&f.checkpoints), Some(5));
		assert_eq!(f.flusher.flush_once().await.unwrap(), 0);

		assert_eq!(*f.checkpoints.saves.lock().unwrap(), vec![2, 4, 5]);
		assert!(f.staging.is_empty().await.unwrap());
	}

	#[tokio::test]
	async fn test_order_preserved_with_log_ids() {
		let f = fixture(3).await;
		let names: Vec<String> = (0..7).map(|i| format!("secret-{i}")).collect();
		for name in &names {
			stage(&f.staging, name).await;
		}

		while f.flusher.flush_once().await.unwrap() > 0 {}

		let delivered = f.store.entries.lock().unwrap();
		assert_eq!(delivered.len(), names.len());
		for (i, entry) in delivered.iter().enumerate() {
			assert_eq!(entry.resource_name, names[i]);
			let log_id = entry.log_id().unwrap();
			let expected_prefix = format!("node-a.{}.", i + 1);
			assert!(log_id.starts_with(&expected_prefix), "{log_id}");
		}
	}

	#[tokio::test]
	async fn test_empty_drain_touches_nothing() {
		let f = fixture(10).await;

		assert_eq!(f.flusher.flush_once().await.unwrap(), 0);

		assert!(f.checkpoints.rows.lock().unwrap().is_empty());
		assert!(f.store.entries.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_store_failure_keeps_batch() {
		let f = fixture(10).await;
		stage(&f.staging, "a").await;
		stage(&f.staging, "b").await;
		f.store.fail.store(true, Ordering::SeqCst);

		let err = f.flusher.flush_once().await.unwrap_err();
		assert!(matches!(err, AuditError::Store(_)));
		assert_eq!(checkpoint_of(&f.checkpoints), None);
		assert_eq!(f.staging.len().await.unwrap(), 2);

		f.store.fail.store(false, Ordering::SeqCst);
		assert_eq!(f.flusher.flush_once().await.unwrap(), 2);
		assert_eq!(f.store.entries.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_poisoned_record_aborts_without_advance() {
		let f = fixture(10).await;
		stage(&f.staging, "a").await;
		f.staging.append("not json").await.unwrap();

		let err = f.flusher.flush_once().await.unwrap_err();
		match err {
			AuditError::Deserialize { sequence_id, .. } => assert_eq!(sequence_id, 2),
			other => panic!("expected Deserialize, got {other:?}"),
		}
		assert!(f.store.entries.lock().unwrap().is_empty());
		assert_eq!(checkpoint_of(&f.checkpoints), None);
		assert_eq!(f.staging.len().await.unwrap(), 2);
	}

	#[tokio::test]
	async fn test_checkpoint_never_decreases() {
		let f = fixture(1).await;
		for i in 0..4 {
			stage(&f.staging, &format!("s{i}")).await;
		}

		while f.flusher.flush_once().await.unwrap() > 0 {}
		stage(&f.staging, "late").await;
		while f.flusher.flush_once().await.unwrap() > 0 {}

		let saves = f.checkpoints.saves.lock().unwrap().clone();
		assert!(saves.windows(2).all(|w| w[0] <= w[1]), "{saves:?}");
		assert_eq!(saves.last(), Some(&5));
	}

	#[tokio::test]
	async fn test_checkpoint_failure_leaves_orphans_for_compaction() {
		let f = fixture(10).await;
		stage(&f.staging, "a").await;
		stage(&f.staging, "b").await;

		// Delivered, but the checkpoint cannot be saved.
		f.checkpoints.fail_save.store(true, Ordering::SeqCst);
		assert!(matches!(
			f.flusher.flush_once().await,
			Err(AuditError::Checkpoint(_))
		));
		assert_eq!(f.store.entries.lock().unwrap().len(), 2);
		assert_eq!(f.staging.len().await.unwrap(), 2);
		f.checkpoints.fail_save.store(false, Ordering::SeqCst);

		// Simulate the checkpoint having advanced before a crash.
		f.checkpoints
			.save(&Checkpoint {
				node_name: "node-a".to_string(),
				last_flushed_sequence_id: 2,
				last_modified_at: Utc::now(),
			})
			.await
			.unwrap();

		assert_eq!(f.flusher.compact().await.unwrap(), 2);
		assert!(f.staging.is_empty().await.unwrap());
		assert_eq!(f.flusher.compact().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_compact_without_checkpoint_is_noop() {
		let f = fixture(10).await;
		stage(&f.staging, "a").await;

		assert_eq!(f.flusher.compact().await.unwrap(), 0);
		assert_eq!(f.staging.len().await.unwrap(), 1);
	}
}
