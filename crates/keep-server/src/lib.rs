// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keep server runtime.
//!
//! Wires the audit pipeline to its SQLite stores and runs the periodic drain.

pub mod error;
pub mod jobs;
pub mod runtime;
pub mod telemetry;

pub use error::{ServerError, ServerResult};
pub use keep_server_config::ServerConfig;
pub use runtime::{reclaim_stale_state, AuditRuntime};
