//! Metrics module for docroute
//!
//! Point-in-time view of the job table and lifetime counters, serialized as
//! JSON for `GET /metrics`.

use crate::jobs::{Job, JobStatus};
use serde::{Deserialize, Serialize};

/// Per-job metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub input_name: String,
    pub from: String,
    pub to: String,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: String,
    pub estimated_duration_secs: u32,
    pub input_size_bytes: u64,
    pub output_size_bytes: Option<u64>,
}

impl From<&Job> for JobMetrics {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            input_name: job.input.name.clone(),
            from: job.path.from.clone(),
            to: job.path.to.clone(),
            status: job.status,
            progress: job.progress,
            stage: job.progress_message.clone(),
            estimated_duration_secs: job.path.estimated_duration_secs,
            input_size_bytes: job.input.size_bytes,
            output_size_bytes: job.result.as_ref().map(|r| r.size_bytes),
        }
    }
}

/// Lifetime counters kept by the job manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub evicted: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub max_concurrent_jobs: u32,
    pub active_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub rejected_submissions: u64,
    pub evicted_jobs: u64,
    /// Jobs still in the table, most recent first
    pub jobs: Vec<JobMetrics>,
}

impl MetricsSnapshot {
    pub fn build(
        timestamp_unix_ms: i64,
        max_concurrent_jobs: u32,
        active_jobs: usize,
        counters: JobCounters,
        jobs: Vec<JobMetrics>,
    ) -> Self {
        Self {
            timestamp_unix_ms,
            max_concurrent_jobs,
            active_jobs,
            completed_jobs: counters.completed,
            failed_jobs: counters.failed,
            cancelled_jobs: counters.cancelled,
            rejected_submissions: counters.rejected,
            evicted_jobs: counters.evicted,
            jobs,
        }
    }
}
