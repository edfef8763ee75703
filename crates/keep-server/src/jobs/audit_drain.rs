// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use keep_server_audit::{drain, AuditMetrics, BatchFlush};
use keep_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::{instrument, warn};

pub const AUDIT_DRAIN_JOB_ID: &str = "audit-drain";

/// Drains the node's staging log into the central audit store once per tick.
///
/// After every run, failed or not, the pipeline counters are written to the
/// metrics file when one is configured.
pub struct AuditDrainJob {
	flusher: Arc<dyn BatchFlush>,
	metrics: Arc<AuditMetrics>,
	metrics_file: Option<PathBuf>,
}

impl AuditDrainJob {
	pub fn new(flusher: Arc<dyn BatchFlush>, metrics: Arc<AuditMetrics>) -> Self {
		Self {
			flusher,
			metrics,
			metrics_file: None,
		}
	}

	pub fn with_metrics_file(mut self, path: Option<PathBuf>) -> Self {
		self.metrics_file = path;
		self
	}
}

#[async_trait]
impl Job for AuditDrainJob {
	fn id(&self) -> &str {
		AUDIT_DRAIN_JOB_ID
	}

	fn name(&self) -> &str {
		"Audit Drain"
	}

	fn description(&self) -> &str {
		"Move staged audit entries into the central audit store"
	}

	#[instrument(skip(self, ctx), fields(job_id = AUDIT_DRAIN_JOB_ID, run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let result = drain(self.flusher.as_ref(), &self.metrics).await;
		if let Some(path) = &self.metrics_file {
			if let Err(e) = self.metrics.write_textfile(path).await {
				warn!(error = %e, "failed to write audit metrics file");
			}
		}

		// Errors were already counted by the drain; the next tick retries.
		let report = result.map_err(|e| JobError::Failed {
			message: e.to_string(),
			retryable: false,
		})?;

		Ok(JobOutput {
			message: format!(
				"Flushed {} audit entries in {} batches",
				report.entries, report.batches
			),
			metadata: Some(serde_json::json!({
				"entries": report.entries,
				"batches": report.batches,
				"orphans_reclaimed": report.orphans_reclaimed,
			})),
		})
	}
}
