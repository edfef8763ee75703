// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs run by the server's scheduler.

mod audit_drain;

pub use audit_drain::{AuditDrainJob, AUDIT_DRAIN_JOB_ID};
