// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, instrument, warn};

use crate::error::AuditError;
use crate::event::AuditEntry;
use crate::metrics::AuditMetrics;
use crate::staging::StagingLog;
use crate::store::CentralAuditStore;

/// Entry point used by request handlers to record an audited operation.
///
/// Implementations never return an error: audit durability degrades silently
/// (and is counted) rather than failing the operation being audited.
#[async_trait]
pub trait AsyncAuditLogger: Send + Sync {
	async fn log(&self, entry: AuditEntry);
}

/// Writes every entry to the local [`StagingLog`] before returning.
///
/// Delivery to the central store happens later, off the request path.
pub struct DurableAuditLogger {
	staging: Arc<StagingLog>,
	metrics: Arc<AuditMetrics>,
}

impl DurableAuditLogger {
	pub fn new(staging: Arc<StagingLog>, metrics: Arc<AuditMetrics>) -> Self {
		Self { staging, metrics }
	}
}

#[async_trait]
impl AsyncAuditLogger for DurableAuditLogger {
	#[instrument(skip(self, entry), fields(project_id = %entry.project_id, action = %entry.action))]
	async fn log(&self, entry: AuditEntry) {
		let payload = match serde_json::to_string(&entry) {
			Ok(payload) => payload,
			Err(e) => {
				let err = AuditError::Serialize(e);
				error!(error = %err, "failed to serialize audit entry");
				self.metrics.record_error(err.action(), err.exception());
				return;
			}
		};

		match self.staging.append(&payload).await {
			Ok(_) => self.metrics.entries_staged.inc(),
			Err(e) => {
				error!(error = %e, "failed to log audit entry");
				self.metrics.record_error("log", e.exception());
			}
		}
	}
}

/// Fire-and-forget delivery straight to the central store.
///
/// Each entry is saved on its own spawned task; a failed save is logged and
/// counted, and the entry is lost. Use only where audit durability is not a
/// requirement.
pub struct DirectAuditLogger {
	store: Arc<dyn CentralAuditStore>,
	metrics: Arc<AuditMetrics>,
}

impl DirectAuditLogger {
	pub fn new(store: Arc<dyn CentralAuditStore>, metrics: Arc<AuditMetrics>) -> Self {
		Self { store, metrics }
	}
}

#[async_trait]
impl AsyncAuditLogger for DirectAuditLogger {
	async fn log(&self, entry: AuditEntry) {
		let store = Arc::clone(&self.store);
		let metrics = Arc::clone(&self.metrics);
		tokio::spawn(async move {
			if let Err(e) = store.save(entry).await {
				warn!(error = %e, "direct audit save failed");
				metrics.record_error("save", e.kind());
			}
		});
	}
}
