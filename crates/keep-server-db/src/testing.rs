// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pool helpers for tests.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::Result;
use crate::pool::run_migrations;

/// Each connection to `:memory:` opens its own database, so the pool is
/// pinned to a single connection.
pub async fn create_test_pool() -> Result<SqlitePool> {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect(":memory:")
		.await?;
	Ok(pool)
}

pub async fn create_migrated_test_pool() -> Result<SqlitePool> {
	let pool = create_test_pool().await?;
	run_migrations(&pool).await?;
	Ok(pool)
}
