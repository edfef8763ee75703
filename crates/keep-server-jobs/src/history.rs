// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::types::{JobRun, JobStatus};

const DEFAULT_RUNS_PER_JOB: usize = 50;

/// Bounded, in-memory record of recent runs per job, newest last.
pub struct RunHistory {
	runs: Mutex<HashMap<String, VecDeque<JobRun>>>,
	capacity: usize,
}

impl RunHistory {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_RUNS_PER_JOB)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			runs: Mutex::new(HashMap::new()),
			capacity: capacity.max(1),
		}
	}

	pub async fn record_run_start(&self, run: &JobRun) {
		let mut runs = self.runs.lock().await;
		let job_runs = runs.entry(run.job_id.clone()).or_default();
		if job_runs.len() == self.capacity {
			job_runs.pop_front();
		}
		job_runs.push_back(run.clone());
	}

	pub async fn record_run_complete(
		&self,
		job_id: &str,
		run_id: &str,
		status: JobStatus,
		error_message: Option<String>,
		metadata: Option<serde_json::Value>,
	) {
		let mut runs = self.runs.lock().await;
		let Some(run) = runs
			.get_mut(job_id)
			.and_then(|job_runs| job_runs.iter_mut().rev().find(|r| r.id == run_id))
		else {
			return;
		};

		let now = Utc::now();
		run.status = status;
		run.completed_at = Some(now);
		run.duration_ms = Some((now - run.started_at).num_milliseconds());
		run.error_message = error_message;
		run.metadata = metadata;
	}

	pub async fn get_last_run(&self, job_id: &str) -> Option<JobRun> {
		let runs = self.runs.lock().await;
		runs.get(job_id).and_then(|job_runs| job_runs.back().cloned())
	}

	/// Failed runs since the most recent success, ignoring cancelled and running ones.
	pub async fn count_consecutive_failures(&self, job_id: &str) -> u32 {
		let runs = self.runs.lock().await;
		let Some(job_runs) = runs.get(job_id) else {
			return 0;
		};

		let mut failures = 0;
		for run in job_runs.iter().rev() {
			match run.status {
				JobStatus::Failed => failures += 1,
				JobStatus::Succeeded => break,
				JobStatus::Running | JobStatus::Cancelled => {}
			}
		}
		failures
	}
}

impl Default for RunHistory {
	fn default() -> Self {
		Self::new()
	}
}
