// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reclaims the local state of nodes that have stopped flushing.
//!
//! A node whose checkpoint has not moved within the staleness window is
//! treated as decommissioned: its checkpoint row and its staging directory are
//! deleted. This must never run against a node that is still draining.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, instrument};

use crate::checkpoint::CheckpointStore;
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
	/// Staleness duration is zero or negative.
	Disabled,
	NoCheckpoint,
	/// The checkpoint moved within the staleness window.
	Active,
	Reclaimed { directory_removed: bool },
}

pub struct StaleReclaimer {
	checkpoints: Arc<dyn CheckpointStore>,
	storage_location: PathBuf,
	staleness: TimeDelta,
}

impl StaleReclaimer {
	pub fn new(
		checkpoints: Arc<dyn CheckpointStore>,
		storage_location: impl Into<PathBuf>,
		staleness: TimeDelta,
	) -> Self {
		Self {
			checkpoints,
			storage_location: storage_location.into(),
			staleness,
		}
	}

	pub async fn reclaim(&self, node_name: &str) -> AuditResult<ReclaimOutcome> {
		self.reclaim_at(node_name, Utc::now()).await
	}

	#[instrument(skip(self), fields(location = %self.storage_location.display()))]
	pub async fn reclaim_at(
		&self,
		node_name: &str,
		now: DateTime<Utc>,
	) -> AuditResult<ReclaimOutcome> {
		if self.staleness <= TimeDelta::zero() {
			info!("staleness duration is zero or negative, not reclaiming staged audit data");
			return Ok(ReclaimOutcome::Disabled);
		}

		let checkpoint = self
			.checkpoints
			.find_by_node_name(node_name)
			.await
			.map_err(AuditError::Checkpoint)?;
		let Some(checkpoint) = checkpoint else {
			info!("no checkpoint present, not reclaiming staged audit data");
			return Ok(ReclaimOutcome::NoCheckpoint);
		};

		if now - checkpoint.last_modified_at < self.staleness {
			info!(
				last_modified_at = %checkpoint.last_modified_at,
				"checkpoint is not stale, keeping staged audit data"
			);
			return Ok(ReclaimOutcome::Active);
		}

		let cwd = std::env::current_dir().map_err(|source| AuditError::Io {
			path: PathBuf::from("."),
			source,
		})?;
		let location = normalize_path(&self.storage_location, &cwd);
		if cwd.starts_with(&location) {
			return Err(AuditError::UnsafeStorageLocation { path: location });
		}

		info!(
			last_modified_at = %checkpoint.last_modified_at,
			"checkpoint is stale, deleting checkpoint and staged audit data"
		);
		self
			.checkpoints
			.delete_by_node_name(node_name)
			.await
			.map_err(AuditError::Checkpoint)?;

		let directory_removed = remove_dir_if_exists(&location).await?;
		Ok(ReclaimOutcome::Reclaimed { directory_removed })
	}
}

async fn remove_dir_if_exists(path: &Path) -> AuditResult<bool> {
	match tokio::fs::remove_dir_all(path).await {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
		Err(source) => Err(AuditError::Io {
			path: path.to_path_buf(),
			source,
		}),
	}
}

/// Make `path` absolute against `base` and fold `.` and `..` lexically.
///
/// Symlinks are not resolved.
pub fn normalize_path(path: &Path, base: &Path) -> PathBuf {
	let joined = if path.is_absolute() {
		path.to_path_buf()
	} else {
		base.join(path)
	};

	let mut normalized = PathBuf::new();
	for component in joined.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				normalized.pop();
			}
			other => normalized.push(other.as_os_str()),
		}
	}
	normalized
}
