// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{HealthState, JobHealthStatus, JobsHealthStatus};
use crate::history::RunHistory;
use crate::job::Job;
use crate::types::{JobRun, JobStatus, TriggerSource};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
	cancellation_token: CancellationToken,
	/// Held for the duration of a run.
	run_guard: Arc<Mutex<()>>,
}

pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	history: Arc<RunHistory>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(history: Arc<RunHistory>) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: HashMap::new(),
			history,
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		let id = job.id().to_string();
		info!(
			job_id = %id,
			name = %job.name(),
			description = %job.description(),
			interval = ?interval,
			"Registered periodic job"
		);
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				interval,
				cancellation_token: CancellationToken::new(),
				run_guard: Arc::new(Mutex::new(())),
			},
		);
	}

	/// Spawn one loop per periodic job. Each loop waits `interval` after the
	/// previous run returned before starting the next one.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let job = Arc::clone(&registered.job);
			let history = Arc::clone(&self.history);
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let cancellation_token = registered.cancellation_token.clone();
			let run_guard = Arc::clone(&registered.run_guard);
			let interval = registered.interval;
			let job_id = job_id.clone();

			let handle = tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							if cancellation_token.is_cancelled() {
								continue;
							}
							let _ = run_job(
								&job,
								&history,
								TriggerSource::Schedule,
								&cancellation_token,
								&run_guard,
							).await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "Shutting down periodic job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
		Ok(())
	}

	/// Run a job now and wait for it. If a scheduled run of the same job is in
	/// progress, this waits for it to finish first.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		run_job(
			&registered.job,
			&self.history,
			triggered_by,
			&registered.cancellation_token,
			&registered.run_guard,
		)
		.await
	}

	/// Stop all loops. A run already in progress is allowed to finish; runs
	/// that have not started yet, including triggers waiting on it, are
	/// cancelled.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		for registered in self.jobs.values() {
			registered.cancellation_token.cancel();
		}
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.history.get_last_run(job_id).await;
		let consecutive_failures = self.history.count_consecutive_failures(job_id).await;

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: HealthState::from_last_run(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::new();
		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				jobs.push(status);
			}
		}
		JobsHealthStatus::from_jobs(jobs)
	}
}

async fn run_job(
	job: &Arc<dyn Job>,
	history: &RunHistory,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
	run_guard: &Mutex<()>,
) -> Result<String> {
	let _running = run_guard.lock().await;
	if cancellation_token.is_cancelled() {
		info!(job_id = %job.id(), triggered_by = triggered_by.as_str(), "Job cancelled before start");
		return Err(JobError::Cancelled);
	}
	let run_id = uuid::Uuid::new_v4().to_string();

	let ctx = JobContext {
		run_id: run_id.clone(),
		triggered_by,
		cancellation_token: cancellation_token.clone(),
	};

	history
		.record_run_start(&JobRun {
			id: run_id.clone(),
			job_id: job.id().to_string(),
			status: JobStatus::Running,
			started_at: Utc::now(),
			completed_at: None,
			duration_ms: None,
			error_message: None,
			triggered_by,
			metadata: None,
		})
		.await;

	match job.run(&ctx).await {
		Ok(output) => {
			info!(
				job_id = %job.id(),
				run_id = %run_id,
				triggered_by = triggered_by.as_str(),
				message = %output.message,
				"Job completed successfully"
			);
			history
				.record_run_complete(job.id(), &run_id, JobStatus::Succeeded, None, output.metadata)
				.await;
			Ok(run_id)
		}
		Err(JobError::Cancelled) => {
			history
				.record_run_complete(job.id(), &run_id, JobStatus::Cancelled, None, None)
				.await;
			info!(job_id = %job.id(), run_id = %run_id, "Job cancelled");
			Err(JobError::Cancelled)
		}
		Err(e) => {
			let message = e.to_string();
			history
				.record_run_complete(job.id(), &run_id, JobStatus::Failed, Some(message.clone()), None)
				.await;
			warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed");

			let last_run = history.get_last_run(job.id()).await;
			let consecutive_failures = history.count_consecutive_failures(job.id()).await;
			match HealthState::from_last_run(last_run.as_ref(), consecutive_failures) {
				HealthState::Unhealthy => error!(
					job_id = %job.id(),
					consecutive_failures,
					"Job is unhealthy"
				),
				state => warn!(
					job_id = %job.id(),
					consecutive_failures,
					health = state.as_str(),
					"Job health degraded"
				),
			}
			Err(e)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobOutput;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	struct MockJob {
		id: String,
		work: Duration,
		fail: AtomicBool,
		runs: AtomicUsize,
		running: AtomicUsize,
		max_running: AtomicUsize,
		started_at: Mutex<Vec<tokio::time::Instant>>,
	}

	impl MockJob {
		fn new(id: &str, work: Duration) -> Arc<Self> {
			Arc::new(Self {
				id: id.to_string(),
				work,
				fail: AtomicBool::new(false),
				runs: AtomicUsize::new(0),
				running: AtomicUsize::new(0),
				max_running: AtomicUsize::new(0),
				started_at: Mutex::new(Vec::new()),
			})
		}
	}

	#[async_trait]
	impl Job for MockJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Mock Job"
		}

		fn description(&self) -> &str {
			"A mock job for testing"
		}

		async fn run(&self, _ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			self.started_at.lock().await.push(tokio::time::Instant::now());
			let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_running.fetch_max(now_running, Ordering::SeqCst);
			if !self.work.is_zero() {
				tokio::time::sleep(self.work).await;
			}
			self.running.fetch_sub(1, Ordering::SeqCst);
			self.runs.fetch_add(1, Ordering::SeqCst);

			if self.fail.load(Ordering::SeqCst) {
				return Err(JobError::Failed {
					message: "mock failure".to_string(),
					retryable: false,
				});
			}
			Ok(JobOutput {
				message: "Mock job completed".to_string(),
				metadata: Some(serde_json::json!({ "runs": self.runs.load(Ordering::SeqCst) })),
			})
		}
	}

	fn scheduler_with(job: Arc<MockJob>, interval: Duration) -> JobScheduler {
		let mut scheduler = JobScheduler::new(Arc::new(RunHistory::new()));
		scheduler.register_periodic(job, interval);
		scheduler
	}

	#[tokio::test]
	async fn test_register_periodic_job() {
		let scheduler = scheduler_with(MockJob::new("periodic-job-1", Duration::ZERO), Duration::from_secs(60));
		assert_eq!(scheduler.job_ids(), vec!["periodic-job-1".to_string()]);
	}

	#[tokio::test]
	async fn test_trigger_nonexistent_job_returns_not_found() {
		let scheduler = JobScheduler::new(Arc::new(RunHistory::new()));

		let result = scheduler
			.trigger_job("nonexistent-job", TriggerSource::Manual)
			.await;

		match result.unwrap_err() {
			JobError::NotFound(id) => assert_eq!(id, "nonexistent-job"),
			e => panic!("Expected NotFound error, got: {:?}", e),
		}
	}

	#[tokio::test]
	async fn test_trigger_runs_without_start() {
		let job = MockJob::new("job", Duration::ZERO);
		let scheduler = scheduler_with(Arc::clone(&job), Duration::from_secs(60));

		let run_id = scheduler.trigger_job("job", TriggerSource::Startup).await.unwrap();

		assert_eq!(job.runs.load(Ordering::SeqCst), 1);
		let status = scheduler.job_status("job").await.unwrap();
		let last_run = status.last_run.unwrap();
		assert_eq!(last_run.run_id, run_id);
		assert_eq!(last_run.status, JobStatus::Succeeded);
		assert_eq!(last_run.metadata, Some(serde_json::json!({ "runs": 1 })));
	}

	#[tokio::test(start_paused = true)]
	async fn test_periodic_ticks_use_fixed_delay() {
		let job = MockJob::new("job", Duration::from_secs(5));
		let scheduler = scheduler_with(Arc::clone(&job), Duration::from_secs(10));
		let origin = tokio::time::Instant::now();

		scheduler.start().await.unwrap();
		tokio::time::sleep(Duration::from_secs(36)).await;
		scheduler.shutdown().await;

		// Runs start at 10s and 25s: the delay is measured from the end of a run.
		let starts: Vec<u64> = job
			.started_at
			.lock()
			.await
			.iter()
			.map(|t| t.duration_since(origin).as_secs())
			.collect();
		assert_eq!(starts, vec![10, 25]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_manual_trigger_never_overlaps_scheduled_run() {
		let job = MockJob::new("job", Duration::from_secs(5));
		let scheduler = scheduler_with(Arc::clone(&job), Duration::from_secs(1));

		scheduler.start().await.unwrap();
		// The scheduled run started at 1s is still in progress.
		tokio::time::sleep(Duration::from_millis(1500)).await;
		scheduler.trigger_job("job", TriggerSource::Manual).await.unwrap();
		scheduler.shutdown().await;

		assert!(job.runs.load(Ordering::SeqCst) >= 2);
		assert_eq!(job.max_running.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_trigger_after_shutdown_is_cancelled() {
		let job = MockJob::new("job", Duration::ZERO);
		let scheduler = scheduler_with(Arc::clone(&job), Duration::from_secs(60));

		scheduler.shutdown().await;
		let err = scheduler.trigger_job("job", TriggerSource::Manual).await.unwrap_err();

		assert!(matches!(err, JobError::Cancelled));
		assert_eq!(job.runs.load(Ordering::SeqCst), 0);
		assert!(scheduler.job_status("job").await.unwrap().last_run.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_trigger_waiting_on_shutdown_run_is_cancelled() {
		let job = MockJob::new("job", Duration::from_secs(5));
		let scheduler = Arc::new(scheduler_with(Arc::clone(&job), Duration::from_secs(1)));

		scheduler.start().await.unwrap();
		tokio::time::sleep(Duration::from_millis(1500)).await;
		// Queued behind the scheduled run that is still in progress.
		let queued = {
			let scheduler = Arc::clone(&scheduler);
			tokio::spawn(async move { scheduler.trigger_job("job", TriggerSource::Manual).await })
		};
		tokio::task::yield_now().await;
		scheduler.shutdown().await;

		assert!(matches!(queued.await.unwrap(), Err(JobError::Cancelled)));
		assert_eq!(job.runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_stops_ticks() {
		let job = MockJob::new("job", Duration::ZERO);
		let scheduler = scheduler_with(Arc::clone(&job), Duration::from_secs(1));

		scheduler.start().await.unwrap();
		tokio::time::sleep(Duration::from_millis(2500)).await;
		scheduler.shutdown().await;
		let runs = job.runs.load(Ordering::SeqCst);
		tokio::time::sleep(Duration::from_secs(5)).await;

		assert_eq!(runs, 2);
		assert_eq!(job.runs.load(Ordering::SeqCst), runs);
	}

	#[tokio::test]
	async fn test_failures_degrade_health() {
		let job = MockJob::new("job", Duration::ZERO);
		job.fail.store(true, Ordering::SeqCst);
		let scheduler = scheduler_with(Arc::clone(&job), Duration::from_secs(60));

		assert_eq!(scheduler.health_status().await.status, HealthState::Healthy);

		let err = scheduler.trigger_job("job", TriggerSource::Manual).await.unwrap_err();
		assert!(matches!(err, JobError::Failed { .. }));
		assert_eq!(scheduler.health_status().await.status, HealthState::Degraded);

		for _ in 0..2 {
			let _ = scheduler.trigger_job("job", TriggerSource::Manual).await;
		}
		let health = scheduler.health_status().await;
		assert_eq!(health.status, HealthState::Unhealthy);
		assert_eq!(health.jobs[0].consecutive_failures, 3);

		job.fail.store(false, Ordering::SeqCst);
		scheduler.trigger_job("job", TriggerSource::Manual).await.unwrap();
		assert_eq!(scheduler.health_status().await.status, HealthState::Healthy);
	}
}
