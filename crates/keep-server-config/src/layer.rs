// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{AuditConfigLayer, DatabaseConfigLayer, LoggingConfigLayer};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub audit: Option<AuditConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.audit, other.audit, AuditConfigLayer::merge);
		merge_option(
			&mut self.database,
			other.database,
			DatabaseConfigLayer::merge,
		);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_empty_layers() {
		let mut base = ServerConfigLayer::default();
		base.merge(ServerConfigLayer::default());
		assert!(base.audit.is_none());
		assert!(base.database.is_none());
	}

	#[test]
	fn test_merge_other_overwrites_field_by_field() {
		let mut base = ServerConfigLayer {
			audit: Some(AuditConfigLayer {
				node_name: Some("node-a".to_string()),
				batch_size: Some(50),
				..Default::default()
			}),
			..Default::default()
		};
		let other = ServerConfigLayer {
			audit: Some(AuditConfigLayer {
				batch_size: Some(200),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(other);

		let audit = base.audit.unwrap();
		assert_eq!(audit.node_name.as_deref(), Some("node-a"));
		assert_eq!(audit.batch_size, Some(200));
	}

	#[test]
	fn test_merge_adds_missing_sections() {
		let mut base = ServerConfigLayer::default();
		let other = ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: Some("sqlite:/var/lib/keep/keep.db".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(other);
		assert_eq!(
			base.database.unwrap().url.as_deref(),
			Some("sqlite:/var/lib/keep/keep.db")
		);
	}
}
