// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keep_server_audit::AuditStoreError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for AuditStoreError {
	fn from(e: DbError) -> Self {
		match &e {
			DbError::Sqlx(inner) if is_transient_error(inner) => {
				AuditStoreError::Transient(e.to_string())
			}
			_ => AuditStoreError::Permanent(e.to_string()),
		}
	}
}

fn is_transient_error(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Io(_) => true,
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::PoolClosed => true,
		sqlx::Error::Database(db_err) => {
			let msg = db_err.message().to_lowercase();
			msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
		}
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_pool_errors_are_transient() {
		let err: AuditStoreError = DbError::Sqlx(sqlx::Error::PoolTimedOut).into();
		assert!(matches!(err, AuditStoreError::Transient(_)));
	}

	#[test]
	fn test_internal_errors_are_permanent() {
		let err: AuditStoreError = DbError::Internal("bad timestamp".to_string()).into();
		assert_eq!(
			err,
			AuditStoreError::Permanent("Internal: bad timestamp".to_string())
		);
	}
}
