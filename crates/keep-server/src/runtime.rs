// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide audit resources.

use std::sync::Arc;

use keep_server_audit::{
	drain, AsyncAuditLogger, AuditMetrics, AuditResult, BatchFlusher, CentralAuditStore,
	CheckpointStore, DirectAuditLogger, DrainReport, DurableAuditLogger, ReclaimOutcome,
	StagingLog, StaleReclaimer,
};
use keep_server_config::{AuditConfig, AuditMode, ServerConfig};
use keep_server_db::{create_pool, run_migrations, AuditEntryRepository, CheckpointRepository};
use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use crate::error::ServerResult;
use crate::jobs::AuditDrainJob;

/// Staging side of the durable mode.
struct DurablePipeline {
	staging: Arc<StagingLog>,
	flusher: Arc<BatchFlusher>,
}

/// The central database pool, the staging log in durable mode, and
/// everything built on them.
///
/// Acquired once at startup and released by [`AuditRuntime::shutdown`].
pub struct AuditRuntime {
	config: AuditConfig,
	pool: SqlitePool,
	metrics: Arc<AuditMetrics>,
	logger: Arc<dyn AsyncAuditLogger>,
	pipeline: Option<DurablePipeline>,
	reclaimed: ReclaimOutcome,
}

impl AuditRuntime {
	pub async fn start(config: &ServerConfig) -> ServerResult<Self> {
		let pool = create_pool(&config.database.url, config.database.max_connections).await?;
		run_migrations(&pool).await?;
		Self::open(config.audit.clone(), pool).await
	}

	/// Build the runtime on an already migrated pool.
	///
	/// In durable mode stale state of this node is reclaimed before the
	/// staging log is opened. Direct mode opens no local storage.
	pub async fn open(config: AuditConfig, pool: SqlitePool) -> ServerResult<Self> {
		let store: Arc<dyn CentralAuditStore> = Arc::new(AuditEntryRepository::new(pool.clone()));
		let metrics = Arc::new(AuditMetrics::new()?);

		let (logger, pipeline, reclaimed) = match config.mode {
			AuditMode::Durable => {
				let checkpoints: Arc<dyn CheckpointStore> =
					Arc::new(CheckpointRepository::new(pool.clone()));
				let reclaimed = reclaim_with(&config, Arc::clone(&checkpoints)).await?;

				let staging = Arc::new(StagingLog::open(&config.local_storage_location).await?);
				let flusher = Arc::new(BatchFlusher::new(
					Arc::clone(&staging),
					checkpoints,
					store,
					Arc::clone(&metrics),
					config.node_name.clone(),
					config.batch_size,
				));
				let logger: Arc<dyn AsyncAuditLogger> = Arc::new(DurableAuditLogger::new(
					Arc::clone(&staging),
					Arc::clone(&metrics),
				));

				info!(
					node_name = %config.node_name,
					location = %staging.location().display(),
					batch_size = config.batch_size,
					"durable audit pipeline ready"
				);
				(logger, Some(DurablePipeline { staging, flusher }), reclaimed)
			}
			AuditMode::Direct => {
				info!(
					node_name = %config.node_name,
					"direct audit logging ready, entries are not staged"
				);
				let logger: Arc<dyn AsyncAuditLogger> =
					Arc::new(DirectAuditLogger::new(store, Arc::clone(&metrics)));
				(logger, None, ReclaimOutcome::Disabled)
			}
		};

		Ok(Self {
			config,
			pool,
			metrics,
			logger,
			pipeline,
			reclaimed,
		})
	}

	pub fn config(&self) -> &AuditConfig {
		&self.config
	}

	pub fn logger(&self) -> Arc<dyn AsyncAuditLogger> {
		Arc::clone(&self.logger)
	}

	pub fn metrics(&self) -> Arc<AuditMetrics> {
		Arc::clone(&self.metrics)
	}

	/// The staging log, in durable mode.
	pub fn staging(&self) -> Option<&StagingLog> {
		self.pipeline.as_ref().map(|p| p.staging.as_ref())
	}

	/// What startup reclamation did.
	pub fn reclaimed(&self) -> &ReclaimOutcome {
		&self.reclaimed
	}

	/// The periodic drain job, in durable mode.
	pub fn drain_job(&self) -> Option<AuditDrainJob> {
		self.pipeline.as_ref().map(|p| {
			AuditDrainJob::new(p.flusher.clone(), Arc::clone(&self.metrics))
				.with_metrics_file(self.config.metrics_file.clone())
		})
	}

	/// Drain the staging log once. Direct mode has nothing staged.
	pub async fn drain(&self) -> AuditResult<DrainReport> {
		let result = match &self.pipeline {
			Some(p) => drain(p.flusher.as_ref(), &self.metrics).await,
			None => Ok(DrainReport::default()),
		};
		self.publish_metrics().await;
		result
	}

	/// Write the counters to the configured metrics file, if any.
	pub async fn publish_metrics(&self) {
		if let Some(path) = &self.config.metrics_file {
			if let Err(e) = self.metrics.write_textfile(path).await {
				warn!(error = %e, "failed to write audit metrics file");
			}
		}
	}

	pub async fn shutdown(self) {
		self.publish_metrics().await;
		if let Some(p) = &self.pipeline {
			p.staging.close().await;
		}
		self.pool.close().await;
		info!("audit pipeline closed");
	}
}

/// Run the stale reclaimer for the configured node without opening the staging log.
pub async fn reclaim_stale_state(config: &ServerConfig) -> ServerResult<ReclaimOutcome> {
	let pool = create_pool(&config.database.url, config.database.max_connections).await?;
	run_migrations(&pool).await?;
	let checkpoints: Arc<dyn CheckpointStore> = Arc::new(CheckpointRepository::new(pool.clone()));

	let outcome = reclaim_with(&config.audit, checkpoints).await;
	pool.close().await;
	outcome
}

async fn reclaim_with(
	config: &AuditConfig,
	checkpoints: Arc<dyn CheckpointStore>,
) -> ServerResult<ReclaimOutcome> {
	let reclaimer = StaleReclaimer::new(
		checkpoints,
		config.local_storage_location.clone(),
		config.staleness_duration,
	);
	Ok(reclaimer.reclaim(&config.node_name).await?)
}
