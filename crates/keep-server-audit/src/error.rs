// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Error, Debug)]
pub enum AuditError {
	#[error("failed to serialize audit entry: {0}")]
	Serialize(#[source] serde_json::Error),

	#[error("failed to deserialize staged audit entry {sequence_id}: {source}")]
	Deserialize {
		sequence_id: i64,
		#[source]
		source: serde_json::Error,
	},

	#[error("staging log error: {0}")]
	Staging(#[from] sqlx::Error),

	#[error("central audit store error: {0}")]
	Store(#[source] AuditStoreError),

	#[error("checkpoint store error: {0}")]
	Checkpoint(#[source] AuditStoreError),

	#[error("refusing to delete staging directory {path}: it contains the working directory")]
	UnsafeStorageLocation { path: PathBuf },

	#[error("io error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl AuditError {
	/// Value of the `action` label recorded when this error is counted.
	///
	/// Staging errors map to `fetch-logs` here; the write path in
	/// [`crate::DurableAuditLogger`] counts them as `log` instead.
	pub fn action(&self) -> &'static str {
		match self {
			AuditError::Serialize(_) => "serialize",
			AuditError::Deserialize { .. } => "deserialize",
			AuditError::Staging(_) => "fetch-logs",
			AuditError::Store(_) => "save",
			AuditError::Checkpoint(_) => "checkpoint",
			AuditError::UnsafeStorageLocation { .. } | AuditError::Io { .. } => "reclaim",
		}
	}

	/// Value of the `exception` label recorded when this error is counted.
	pub fn exception(&self) -> &'static str {
		match self {
			AuditError::Serialize(_) | AuditError::Deserialize { .. } => "serde_json",
			AuditError::Staging(_) => "sqlx",
			AuditError::Store(e) | AuditError::Checkpoint(e) => e.kind(),
			AuditError::UnsafeStorageLocation { .. } => "unsafe_path",
			AuditError::Io { .. } => "io",
		}
	}
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditStoreError {
	#[error("transient error: {0}")]
	Transient(String),

	#[error("permanent error: {0}")]
	Permanent(String),
}

impl AuditStoreError {
	pub fn kind(&self) -> &'static str {
		match self {
			AuditStoreError::Transient(_) => "transient",
			AuditStoreError::Permanent(_) => "permanent",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_labels_for_store_errors() {
		let err = AuditError::Store(AuditStoreError::Transient("timeout".to_string()));
		assert_eq!(err.action(), "save");
		assert_eq!(err.exception(), "transient");

		let err = AuditError::Checkpoint(AuditStoreError::Permanent("bad row".to_string()));
		assert_eq!(err.action(), "checkpoint");
		assert_eq!(err.exception(), "permanent");
	}

	#[test]
	fn test_labels_for_serialize() {
		let source = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
		let err = AuditError::Serialize(source);
		assert_eq!(err.action(), "serialize");
		assert_eq!(err.exception(), "serde_json");
	}

	#[test]
	fn test_labels_for_deserialize() {
		let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
		let err = AuditError::Deserialize {
			sequence_id: 7,
			source,
		};
		assert_eq!(err.action(), "deserialize");
		assert_eq!(err.exception(), "serde_json");
		assert!(err.to_string().contains("entry 7"));
	}
}
