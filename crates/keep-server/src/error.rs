// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keep_server_audit::AuditError;
use keep_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("Database error: {0}")]
	Database(#[from] DbError),

	#[error("Audit pipeline error: {0}")]
	Audit(#[from] AuditError),

	#[error("Metrics error: {0}")]
	Metrics(#[from] prometheus::Error),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;
