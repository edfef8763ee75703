// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keep server binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use keep_server::jobs::AUDIT_DRAIN_JOB_ID;
use keep_server::{reclaim_stale_state, telemetry, AuditRuntime};
use keep_server_jobs::{JobScheduler, RunHistory, TriggerSource};

/// Keep server - durable audit pipeline for the secrets service.
#[derive(Parser, Debug)]
#[command(name = "keep-server", about = "Keep secrets server", version)]
struct Args {
	/// Config file to read instead of /etc/keep/server.toml
	#[arg(long, short = 'c', env = "KEEP_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the audit pipeline until interrupted (default)
	Serve,
	/// Drain the local staging log once and exit
	Drain,
	/// Reclaim this node's checkpoint and staging directory if stale, then exit
	Reclaim,
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => keep_server_config::load_config_with_file(path)?,
		None => keep_server_config::load_config()?,
	};

	telemetry::init_tracing(&config.logging);

	tracing::info!(
		node_name = %config.audit.node_name,
		mode = config.audit.mode.as_str(),
		database = %config.database.url,
		"starting keep-server"
	);

	match args.command.unwrap_or(Command::Serve) {
		Command::Reclaim => {
			let outcome = reclaim_stale_state(&config).await?;
			tracing::info!(?outcome, "reclaim finished");
		}
		Command::Drain => {
			let runtime = AuditRuntime::start(&config).await?;
			let result = runtime.drain().await;
			runtime.shutdown().await;
			let report = result?;
			tracing::info!(
				entries = report.entries,
				batches = report.batches,
				orphans_reclaimed = report.orphans_reclaimed,
				"drain finished"
			);
		}
		Command::Serve | Command::Version => serve(&config).await?,
	}

	Ok(())
}

async fn serve(config: &keep_server::ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
	let runtime = AuditRuntime::start(config).await?;

	let mut scheduler = JobScheduler::new(Arc::new(RunHistory::new()));
	let drain_registered = match runtime.drain_job() {
		Some(job) => {
			scheduler.register_periodic(Arc::new(job), config.audit.batch_time_interval);
			true
		}
		None => false,
	};
	let scheduler = Arc::new(scheduler);

	// Deliver whatever the previous process left staged before the first tick.
	if drain_registered {
		if let Err(e) = scheduler
			.trigger_job(AUDIT_DRAIN_JOB_ID, TriggerSource::Startup)
			.await
		{
			tracing::warn!(error = %e, "Startup audit drain failed");
		}
	}

	if let Err(e) = scheduler.start().await {
		tracing::error!(error = %e, "Failed to start job scheduler");
	}

	tokio::signal::ctrl_c().await?;
	tracing::info!("Received shutdown signal");
	tracing::info!("Shutting down job scheduler...");
	scheduler.shutdown().await;

	let health = scheduler.health_status().await;
	tracing::info!(
		status = health.status.as_str(),
		jobs = %serde_json::to_string(&health.jobs).unwrap_or_default(),
		"Job health at shutdown"
	);

	if let Err(e) = runtime.drain().await {
		tracing::warn!(error = %e, "Final audit drain failed, backlog stays staged");
	}
	runtime.shutdown().await;

	tracing::info!("Server shutdown complete");
	Ok(())
}
