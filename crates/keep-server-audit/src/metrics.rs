// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{AuditError, AuditResult};

pub const AUDIT_ERROR_METRIC: &str = "keep_audit_log_errors_total";
pub const ACTION_LABEL: &str = "action";
pub const EXCEPTION_LABEL: &str = "exception";

/// Counters for the audit pipeline.
///
/// Pipeline failures never reach the request path; these counters are the
/// only place they are observable.
pub struct AuditMetrics {
	registry: Registry,

	pub errors: IntCounterVec,
	pub entries_staged: IntCounter,
	pub entries_flushed: IntCounter,
	pub orphans_reclaimed: IntCounter,
	pub checkpoint: IntGauge,
}

impl AuditMetrics {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let errors = IntCounterVec::new(
			Opts::new(AUDIT_ERROR_METRIC, "Audit pipeline failures by outcome"),
			&[ACTION_LABEL, EXCEPTION_LABEL],
		)?;
		registry.register(Box::new(errors.clone()))?;

		let entries_staged = IntCounter::new(
			"keep_audit_entries_staged_total",
			"Audit entries written to the local staging log",
		)?;
		registry.register(Box::new(entries_staged.clone()))?;

		let entries_flushed = IntCounter::new(
			"keep_audit_entries_flushed_total",
			"Audit entries delivered to the central audit store",
		)?;
		registry.register(Box::new(entries_flushed.clone()))?;

		let orphans_reclaimed = IntCounter::new(
			"keep_audit_orphans_reclaimed_total",
			"Staged rows at or below the checkpoint removed by compaction",
		)?;
		registry.register(Box::new(orphans_reclaimed.clone()))?;

		let checkpoint = IntGauge::new(
			"keep_audit_checkpoint",
			"Last persisted checkpoint sequence id for this node",
		)?;
		registry.register(Box::new(checkpoint.clone()))?;

		Ok(Self {
			registry,
			errors,
			entries_staged,
			entries_flushed,
			orphans_reclaimed,
			checkpoint,
		})
	}

	pub fn record_error(&self, action: &str, exception: &str) {
		self.errors.with_label_values(&[action, exception]).inc();
	}

	pub fn error_count(&self, action: &str, exception: &str) -> u64 {
		self.errors.with_label_values(&[action, exception]).get()
	}

	/// Render every metric in the Prometheus text exposition format.
	pub fn encode(&self) -> prometheus::Result<String> {
		let mut buffer = Vec::new();
		TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
		String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
	}

	/// Replace `path` with the current exposition text.
	///
	/// The text goes to a sibling temporary file first and is renamed into
	/// place, so a textfile collector never reads a partial file.
	pub async fn write_textfile(&self, path: &Path) -> AuditResult<()> {
		let io_error = |source: std::io::Error| AuditError::Io {
			path: path.to_path_buf(),
			source,
		};
		let text = self
			.encode()
			.map_err(|e| io_error(std::io::Error::other(e.to_string())))?;

		let mut tmp = path.as_os_str().to_owned();
		tmp.push(".tmp");
		tokio::fs::write(&tmp, text).await.map_err(io_error)?;
		tokio::fs::rename(&tmp, path).await.map_err(io_error)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_record_error_by_labels() {
		let metrics = AuditMetrics::new().unwrap();
		metrics.record_error("serialize", "serde_json");
		metrics.record_error("serialize", "serde_json");
		metrics.record_error("log", "sqlx");

		assert_eq!(metrics.error_count("serialize", "serde_json"), 2);
		assert_eq!(metrics.error_count("log", "sqlx"), 1);
		assert_eq!(metrics.error_count("deserialize", "serde_json"), 0);
	}

	#[test]
	fn test_encode_contains_metric_names() {
		let metrics = AuditMetrics::new().unwrap();
		metrics.record_error("save", "transient");
		metrics.entries_staged.inc();

		let text = metrics.encode().unwrap();
		assert!(text.contains(AUDIT_ERROR_METRIC));
		assert!(text.contains("keep_audit_entries_staged_total 1"));
	}

	#[tokio::test]
	async fn test_write_textfile_replaces_contents() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("keep_audit.prom");
		let metrics = AuditMetrics::new().unwrap();

		metrics.write_textfile(&path).await.unwrap();
		metrics.record_error("save", "transient");
		metrics.write_textfile(&path).await.unwrap();

		let text = std::fs::read_to_string(&path).unwrap();
		assert!(text.contains(
			r#"keep_audit_log_errors_total{action="save",exception="transient"} 1"#
		));
		assert!(!dir.path().join("keep_audit.prom.tmp").exists());
	}

	#[tokio::test]
	async fn test_write_textfile_reports_missing_directory() {
		let dir = tempfile::TempDir::new().unwrap();
		let path = dir.path().join("missing").join("keep_audit.prom");
		let metrics = AuditMetrics::new().unwrap();

		let err = metrics.write_textfile(&path).await.unwrap_err();
		assert!(matches!(err, AuditError::Io { .. }));
	}
}
