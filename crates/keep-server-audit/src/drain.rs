// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tracing::{error, info, warn};

use crate::error::AuditResult;
use crate::flusher::BatchFlush;
use crate::metrics::AuditMetrics;

/// Totals for one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
	pub batches: usize,
	pub entries: usize,
	pub orphans_reclaimed: u64,
}

/// Flush back-to-back until a flush moves nothing.
///
/// The first error ends the drain; it is counted and returned, and the
/// backlog stays where it was for the next drain. Orphan compaction runs
/// first and its failure does not stop the drain.
pub async fn drain(flusher: &dyn BatchFlush, metrics: &AuditMetrics) -> AuditResult<DrainReport> {
	let mut report = DrainReport::default();

	match flusher.compact().await {
		Ok(removed) => report.orphans_reclaimed = removed,
		Err(e) => {
			warn!(error = %e, "audit staging compaction failed");
			metrics.record_error(e.action(), e.exception());
		}
	}

	loop {
		match flusher.flush_once().await {
			Ok(0) => break,
			Ok(moved) => {
				report.batches += 1;
				report.entries += moved;
			}
			Err(e) => {
				error!(error = %e, action = e.action(), "audit flush failed");
				metrics.record_error(e.action(), e.exception());
				return Err(e);
			}
		}
	}

	if report.entries > 0 {
		info!(
			batches = report.batches,
			entries = report.entries,
			"audit backlog drained"
		);
	}
	Ok(report)
}
