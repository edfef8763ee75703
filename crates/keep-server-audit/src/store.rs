// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::error::AuditStoreError;
use crate::event::AuditEntry;

/// The queryable system of record for audit entries.
#[async_trait]
pub trait CentralAuditStore: Send + Sync {
	/// Persist one entry, returning it with its store-assigned `id`.
	async fn save(&self, entry: AuditEntry) -> Result<AuditEntry, AuditStoreError>;

	/// Persist a batch. Either every entry is committed or none is.
	async fn save_all(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEntry>, AuditStoreError>;
}
