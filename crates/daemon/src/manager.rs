//! Job manager for docroute
//!
//! Owns the in-memory job table. Admission, cancellation, progress,
//! completion and eviction all go through one `parking_lot::Mutex`, so the
//! active counter always equals the number of jobs in {pending, processing}.

use crate::catalog::FormatCatalog;
use crate::job_executor::{ConversionExecutor, ConversionOutput};
use crate::jobs::{
    current_timestamp_ms, InputDescriptor, Job, JobFailure, JobOptions, JobStatus,
    OutputDescriptor,
};
use crate::metrics::{JobCounters, JobMetrics, MetricsSnapshot};
use crate::route::{RouteError, RouteResolver};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the progress broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a submission was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    NoRoute(#[from] RouteError),

    #[error("Too many active jobs ({active} of {cap})")]
    AdmissionRejected { active: usize, cap: usize },
}

/// Bytes plus their description, as handed to `submit`
#[derive(Debug, Clone)]
pub struct JobInput {
    pub descriptor: InputDescriptor,
    pub data: Bytes,
}

impl JobInput {
    pub fn new(name: impl Into<String>, format: impl Into<String>, data: Bytes) -> Self {
        Self {
            descriptor: InputDescriptor {
                name: name.into(),
                format: format.into(),
                size_bytes: data.len() as u64,
            },
            data,
        }
    }
}

/// Progress or state change of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    pub message: String,
}

impl ProgressEvent {
    fn of(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            percent: job.progress,
            message: job.progress_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub max_concurrent_jobs: usize,
    /// How long terminal jobs (and their artifacts) are kept
    pub retention: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            retention: Duration::from_secs(3600),
        }
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    /// Submission order, oldest first
    order: VecDeque<String>,
    tokens: HashMap<String, CancellationToken>,
    active: usize,
    counters: JobCounters,
}

impl JobTable {
    /// Drop the job's token and release its admission slot
    fn release(&mut self, id: &str) {
        self.tokens.remove(id);
        self.active = self.active.saturating_sub(1);
    }
}

struct ManagerInner {
    resolver: Arc<RouteResolver>,
    executor: Arc<ConversionExecutor>,
    config: ManagerConfig,
    table: Mutex<JobTable>,
    events: broadcast::Sender<ProgressEvent>,
}

/// Admits, runs, tracks and evicts conversion jobs.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

impl JobManager {
    pub fn new(
        resolver: Arc<RouteResolver>,
        executor: Arc<ConversionExecutor>,
        config: ManagerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                resolver,
                executor,
                config,
                table: Mutex::new(JobTable::default()),
                events,
            }),
        }
    }

    pub fn resolver(&self) -> &Arc<RouteResolver> {
        &self.inner.resolver
    }

    pub fn catalog(&self) -> &FormatCatalog {
        self.inner.resolver.catalog()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Receive progress and state changes of every job
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Feed `id`'s events from `events` to `on_event` until the job is
    /// terminal, then return its final state.
    ///
    /// A lagging receiver may have dropped the terminal event, so after a lag
    /// the job table is consulted directly.
    pub async fn follow<F>(
        &self,
        events: &mut broadcast::Receiver<ProgressEvent>,
        id: &str,
        mut on_event: F,
    ) -> Option<Job>
    where
        F: FnMut(&ProgressEvent),
    {
        loop {
            match events.recv().await {
                Ok(event) if event.job_id == id => {
                    on_event(&event);
                    if event.status.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(job_id = %id, skipped, "Progress receiver lagged");
                    match self.status(id) {
                        Some(job) if !job.is_terminal() => {}
                        _ => break,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        self.status(id)
    }

    /// Admit a job and start converting it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        input: JobInput,
        target_format: &str,
        options: JobOptions,
    ) -> Result<String, SubmitError> {
        let path = self
            .inner
            .resolver
            .resolve(&input.descriptor.format, target_format)?;

        let cap = self.inner.config.max_concurrent_jobs;
        let (job, token) = {
            let mut table = self.inner.table.lock();
            if table.active >= cap {
                table.counters.rejected += 1;
                tracing::warn!(active = table.active, cap, "Submission rejected at admission cap");
                return Err(SubmitError::AdmissionRejected {
                    active: table.active,
                    cap,
                });
            }

            let now = current_timestamp_ms();
            let mut job = Job::new(input.descriptor, path.to.clone(), options, path, now);
            job.start(now);

            let token = CancellationToken::new();
            table.active += 1;
            table.order.push_back(job.id.clone());
            table.tokens.insert(job.id.clone(), token.clone());
            table.jobs.insert(job.id.clone(), job.clone());
            let _ = self.inner.events.send(ProgressEvent::of(&job));
            (job, token)
        };

        tracing::info!(
            job_id = %job.id,
            from = %job.path.from,
            to = %job.path.to,
            hops = job.path.hops.len(),
            "Job admitted"
        );

        let id = job.id.clone();
        let manager = self.clone();
        tokio::spawn(async move { manager.run_job(job, input.data, token).await });
        Ok(id)
    }

    async fn run_job(&self, job: Job, data: Bytes, token: CancellationToken) {
        let on_progress = |percent: u8, message: &str| self.record_progress(&job.id, percent, message);
        let result = self
            .inner
            .executor
            .execute(&job, data, on_progress, &token)
            .await;

        match result {
            Ok(output) => self.finish_completed(&job.id, output).await,
            Err(failure) => self.finish_failed(&job.id, failure),
        }
    }

    fn record_progress(&self, id: &str, percent: u8, message: &str) {
        let mut table = self.inner.table.lock();
        if let Some(job) = table.jobs.get_mut(id) {
            if job.record_progress(percent, message) {
                let _ = self.inner.events.send(ProgressEvent::of(job));
            }
        }
    }

    async fn finish_completed(&self, id: &str, output: ConversionOutput) {
        let retention_ms = self.retention_ms();
        let stale_location = {
            let mut table = self.inner.table.lock();
            let now = current_timestamp_ms();
            let descriptor = OutputDescriptor {
                location: output.location.clone(),
                file_name: output.file_name,
                size_bytes: output.size_bytes,
                expires_at: now.saturating_add(retention_ms),
            };
            let completed = table
                .jobs
                .get_mut(id)
                .map(|job| job.complete(descriptor, now))
                .unwrap_or(false);

            if completed {
                table.release(id);
                table.counters.completed += 1;
                if let Some(job) = table.jobs.get(id) {
                    let _ = self.inner.events.send(ProgressEvent::of(job));
                }
                None
            } else {
                // Cancelled while the artifact was being stored
                Some(output.location)
            }
        };

        match stale_location {
            None => tracing::info!(job_id = %id, "Job completed"),
            Some(location) => {
                if let Err(e) = self.inner.executor.sink().discard(&location).await {
                    tracing::warn!(job_id = %id, error = %e, "Failed to discard artifact of cancelled job");
                }
            }
        }
    }

    fn finish_failed(&self, id: &str, failure: JobFailure) {
        let mut table = self.inner.table.lock();
        let failed = table
            .jobs
            .get_mut(id)
            .map(|job| job.fail(failure.clone(), current_timestamp_ms()))
            .unwrap_or(false);

        if failed {
            table.release(id);
            table.counters.failed += 1;
            if let Some(job) = table.jobs.get(id) {
                let _ = self.inner.events.send(ProgressEvent::of(job));
            }
            tracing::warn!(job_id = %id, code = %failure.code, error = %failure.message, "Job failed");
        }
    }

    /// Snapshot of one job
    pub fn status(&self, id: &str) -> Option<Job> {
        self.inner.table.lock().jobs.get(id).cloned()
    }

    /// Cancel a processing job. Returns false (and changes nothing) for
    /// unknown or already terminal jobs.
    pub fn cancel(&self, id: &str) -> bool {
        let mut table = self.inner.table.lock();
        let cancelled = table
            .jobs
            .get_mut(id)
            .map(|job| job.cancel(current_timestamp_ms()))
            .unwrap_or(false);
        if !cancelled {
            return false;
        }

        if let Some(token) = table.tokens.get(id) {
            token.cancel();
        }
        table.release(id);
        table.counters.cancelled += 1;
        if let Some(job) = table.jobs.get(id) {
            let _ = self.inner.events.send(ProgressEvent::of(job));
        }
        tracing::info!(job_id = %id, "Job cancelled");
        true
    }

    /// Up to `limit` jobs, most recently submitted first
    pub fn history(&self, limit: usize) -> Vec<Job> {
        let table = self.inner.table.lock();
        table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.jobs.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Jobs in {pending, processing}
    pub fn active_count(&self) -> usize {
        self.inner.table.lock().active
    }

    /// Evict terminal jobs whose completion is at least `retention` old
    ///
    /// Only the job table is touched. Artifacts of the returned jobs stay in
    /// the sink until the caller discards them; [`JobManager::sweep`] does both.
    pub fn cleanup(&self, retention: Duration) -> Vec<Job> {
        self.cleanup_at(current_timestamp_ms(), retention)
    }

    pub fn cleanup_at(&self, now_ms: i64, retention: Duration) -> Vec<Job> {
        let retention_ms = duration_ms(retention);
        let mut guard = self.inner.table.lock();
        let table = &mut *guard;

        let expired: Vec<String> = table
            .jobs
            .values()
            .filter(|job| job.is_expired(now_ms, retention_ms))
            .map(|job| job.id.clone())
            .collect();
        if expired.is_empty() {
            return Vec::new();
        }

        let evicted: Vec<Job> = expired
            .iter()
            .filter_map(|id| table.jobs.remove(id))
            .collect();
        table.order.retain(|id| table.jobs.contains_key(id));
        table.counters.evicted += evicted.len() as u64;
        evicted
    }

    /// Run `cleanup` with the configured retention and discard the evicted
    /// jobs' artifacts. Returns how many jobs were evicted.
    pub async fn sweep(&self) -> usize {
        let evicted = self.cleanup(self.inner.config.retention);
        for job in &evicted {
            if let Some(output) = &job.result {
                if let Err(e) = self.inner.executor.sink().discard(&output.location).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to discard artifact");
                }
            }
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted expired jobs");
        }
        evicted.len()
    }

    /// Scaled duration estimate for converting a file of `size_bytes`
    pub fn estimate_duration(&self, from: &str, to: &str, size_bytes: u64) -> Result<f64, RouteError> {
        self.inner.resolver.estimate_duration(from, to, size_bytes)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let table = self.inner.table.lock();
        let jobs = table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.jobs.get(id))
            .map(JobMetrics::from)
            .collect();
        MetricsSnapshot::build(
            current_timestamp_ms(),
            self.inner.config.max_concurrent_jobs as u32,
            table.active,
            table.counters,
            jobs,
        )
    }

    fn retention_ms(&self) -> i64 {
        duration_ms(self.inner.config.retention)
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
