// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for the Keep server: the central audit store and the
//! per-node flush checkpoints.

pub mod audit;
pub mod checkpoint;
pub mod error;
pub mod pool;
pub mod testing;

pub use audit::AuditEntryRepository;
pub use checkpoint::CheckpointRepository;
pub use error::{DbError, Result};
pub use pool::{create_pool, run_migrations};
