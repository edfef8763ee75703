// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable audit pipeline for Keep.
//!
//! Request handlers record entries through an [`AsyncAuditLogger`]. The durable
//! implementation appends to a local [`StagingLog`]; a periodic [`drain`]
//! drives the [`BatchFlusher`] to move the backlog into the
//! [`CentralAuditStore`], tracking progress with a per-node [`Checkpoint`].
//! The [`StaleReclaimer`] removes checkpoints and staging directories of nodes
//! that stopped flushing.

pub mod checkpoint;
pub mod drain;
pub mod error;
pub mod event;
pub mod flusher;
pub mod logger;
pub mod metrics;
pub mod reclaim;
pub mod staging;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use drain::{drain, DrainReport};
pub use error::{AuditError, AuditResult, AuditStoreError};
pub use event::{format_log_id, AuditEntry, AuditEntryBuilder, LOG_ID_METADATA_KEY};
pub use flusher::{BatchFlush, BatchFlusher};
pub use logger::{AsyncAuditLogger, DirectAuditLogger, DurableAuditLogger};
pub use metrics::AuditMetrics;
pub use reclaim::{normalize_path, ReclaimOutcome, StaleReclaimer};
pub use staging::{StagedRecord, StagingLog, STAGING_DB_FILE};
pub use store::CentralAuditStore;
