//! Job model for docroute.
//!
//! A job is one conversion request tracked through the state machine
//! `pending -> processing -> {completed | failed | cancelled}`. Terminal
//! states are final; the transition methods below refuse to leave them.

use crate::route::ConversionPath;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted, not yet handed to the executor.
    Pending,
    /// Executor is running the conversion.
    Processing,
    /// Output stored.
    Completed,
    /// A collaborator, the sink or the timeout failed the job.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Counts against the admission cap
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output quality requested from collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Draft,
    #[default]
    Standard,
    High,
}

/// Per-job options forwarded to every collaborator call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default = "default_preserve_metadata")]
    pub preserve_metadata: bool,
    /// Target reading device, e.g. "kindle" or "kobo"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

fn default_preserve_metadata() -> bool {
    true
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            quality: QualityTier::default(),
            preserve_metadata: default_preserve_metadata(),
            device: None,
        }
    }
}

/// What the caller submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub name: String,
    /// Declared source format id
    pub format: String,
    pub size_bytes: u64,
}

/// Where a completed job's artifact lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    /// Sink-specific handle (a file path for the directory sink)
    pub location: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Unix ms after which the job and artifact may be evicted
    pub expires_at: i64,
}

/// Machine-readable failure reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    ConverterMissing,
    ConverterFailed,
    EmptyOutput,
    StorageFailed,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::ConverterMissing => "converter_missing",
            ErrorCode::ConverterFailed => "converter_failed",
            ErrorCode::EmptyOutput => "empty_output",
            ErrorCode::StorageFailed => "storage_failed",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured terminal error of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A conversion job with full metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    pub input: InputDescriptor,
    pub target_format: String,
    pub options: JobOptions,
    /// Route resolved at submission; never re-resolved.
    pub path: ConversionPath,
    pub status: JobStatus,
    /// 0..=100, never decreasing
    pub progress: u8,
    pub progress_message: String,
    /// Unix timestamps in milliseconds.
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<OutputDescriptor>,
    pub error: Option<JobFailure>,
}

impl Job {
    /// Create a pending job with a fresh UUID.
    pub fn new(
        input: InputDescriptor,
        target_format: String,
        options: JobOptions,
        path: ConversionPath,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input,
            target_format,
            options,
            path,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: String::new(),
            submitted_at: now_ms,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// `pending -> processing`
    pub fn start(&mut self, now_ms: i64) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now_ms);
        true
    }

    /// Record progress while processing. Lower percentages than already
    /// recorded are ignored; values above 100 are clamped.
    pub fn record_progress(&mut self, percent: u8, message: &str) -> bool {
        if self.status != JobStatus::Processing || percent < self.progress {
            return false;
        }
        self.progress = percent.min(100);
        self.progress_message = message.to_string();
        true
    }

    /// `processing -> completed`
    pub fn complete(&mut self, output: OutputDescriptor, now_ms: i64) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.progress_message = "completed".to_string();
        self.completed_at = Some(now_ms);
        self.result = Some(output);
        true
    }

    /// `processing -> failed`
    pub fn fail(&mut self, failure: JobFailure, now_ms: i64) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Failed;
        self.completed_at = Some(now_ms);
        self.error = Some(failure);
        true
    }

    /// `processing -> cancelled`
    pub fn cancel(&mut self, now_ms: i64) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now_ms);
        self.error = Some(JobFailure::new(
            ErrorCode::Cancelled,
            "Job was cancelled by request",
        ));
        true
    }

    /// Whether a terminal job's retention window has elapsed at `now_ms`
    pub fn is_expired(&self, now_ms: i64, retention_ms: i64) -> bool {
        match self.completed_at {
            Some(done) if self.is_terminal() => now_ms.saturating_sub(done) >= retention_ms,
            _ => false,
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn create_test_job() -> Job {
        Job::new(
            InputDescriptor {
                name: "novel.epub".into(),
                format: "epub".into(),
                size_bytes: 2048,
            },
            "pdf".into(),
            JobOptions::default(),
            ConversionPath::identity("epub"),
            1_000,
        )
    }

    fn output() -> OutputDescriptor {
        OutputDescriptor {
            location: "/tmp/out/novel.pdf".into(),
            file_name: "novel.pdf".into(),
            size_bytes: 10,
            expires_at: 5_000,
        }
    }

    #[test]
    fn test_job_creation() {
        let job = create_test_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.submitted_at, 1_000);
        assert!(job.started_at.is_none());
        assert!(Uuid::parse_str(&job.id).is_ok());
        assert!(job.is_active());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = create_test_job();
        assert!(job.start(1_100));
        assert!(!job.start(1_200));
        assert!(job.record_progress(40, "converting"));
        assert!(!job.record_progress(10, "validating"));
        assert_eq!(job.progress, 40);
        assert!(job.complete(output(), 2_000));
        assert_eq!(job.progress, 100);
        assert_eq!(job.completed_at, Some(2_000));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_cannot_cancel_pending_job() {
        let mut job = create_test_job();
        assert!(!job.cancel(1_050));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_cancel_records_error() {
        let mut job = create_test_job();
        job.start(1_100);
        assert!(job.cancel(1_200));
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error.as_ref().map(|e| e.code), Some(ErrorCode::Cancelled));
    }

    #[test]
    fn test_expiry_window() {
        let mut job = create_test_job();
        job.start(1_100);
        job.complete(output(), 2_000);
        assert!(!job.is_expired(2_999, 1_000));
        assert!(job.is_expired(3_000, 1_000));
        assert!(!create_test_job().is_expired(i64::MAX, 0));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        assert_eq!(serde_json::to_string(&ErrorCode::ConverterMissing).unwrap(), "\"converter_missing\"");
        assert_eq!(ErrorCode::EmptyOutput.to_string(), "empty_output");
    }

    #[test]
    fn test_options_defaults_from_json() {
        let opts: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, JobOptions::default());
        assert!(opts.preserve_metadata);
        assert_eq!(opts.quality, QualityTier::Standard);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Progress(u8),
        Complete,
        Fail,
        Cancel,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            (0u8..=120).prop_map(Op::Progress),
            Just(Op::Complete),
            Just(Op::Fail),
            Just(Op::Cancel),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // Once terminal, no sequence of operations changes the job.
        #[test]
        fn prop_terminal_states_are_closed(
            ops in proptest::collection::vec(op_strategy(), 0..40),
        ) {
            let mut job = create_test_job();
            let mut frozen: Option<Job> = None;
            let mut last_progress = 0u8;

            for (i, op) in ops.into_iter().enumerate() {
                let now = 2_000 + i as i64;
                match op {
                    Op::Start => { job.start(now); }
                    Op::Progress(p) => { job.record_progress(p, "tick"); }
                    Op::Complete => { job.complete(output(), now); }
                    Op::Fail => { job.fail(JobFailure::new(ErrorCode::ConverterFailed, "boom"), now); }
                    Op::Cancel => { job.cancel(now); }
                }

                prop_assert!(job.progress >= last_progress);
                prop_assert!(job.progress <= 100);
                last_progress = job.progress;

                match &frozen {
                    Some(snapshot) => prop_assert_eq!(snapshot, &job),
                    None if job.is_terminal() => frozen = Some(job.clone()),
                    None => {}
                }
            }
        }
    }
}
