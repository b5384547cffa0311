//! Conversion executor for docroute
//!
//! Drives the hops of a resolved path through the registered collaborators,
//! reports progress at fixed checkpoints, and stores the final bytes in the
//! artifact sink. Every failure comes back as a [`JobFailure`]; collaborator
//! errors and panics never escape this module.

use crate::encode::{ConvertRequest, ConverterRegistry};
use crate::jobs::{ErrorCode, Job, JobFailure};
use crate::route::Hop;
use crate::sink::ArtifactSink;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Checkpoint percentages
const VALIDATING: u8 = 10;
const DIRECT_START: u8 = 40;
const DIRECT_END: u8 = 80;
const CHAIN_START: u8 = 20;
const CHAIN_END: u8 = 90;
const FINALIZING: u8 = 95;

/// Configuration for the executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorConfig {
    /// Delay inserted at each checkpoint
    pub pacing: Duration,
    /// Wall-clock limit per job (None = unbounded)
    pub timeout: Option<Duration>,
}

/// Where the executor put the converted artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutput {
    pub location: String,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Executes conversion paths on behalf of the job manager.
///
/// Holds no per-job state; concurrent calls share only the read-only
/// registry and the sink.
pub struct ConversionExecutor {
    registry: Arc<ConverterRegistry>,
    sink: Arc<dyn ArtifactSink>,
    config: ExecutorConfig,
}

impl ConversionExecutor {
    pub fn new(registry: Arc<ConverterRegistry>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self::with_config(registry, sink, ExecutorConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConverterRegistry>,
        sink: Arc<dyn ArtifactSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn ArtifactSink> {
        &self.sink
    }

    /// Execute `job.path` on `input`.
    ///
    /// `on_progress` receives non-decreasing percentages. The run stops with
    /// `ErrorCode::Cancelled` at the next checkpoint after `cancel` fires, or
    /// immediately if a collaborator call is in flight (the call is aborted).
    pub async fn execute<F>(
        &self,
        job: &Job,
        input: Bytes,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutput, JobFailure>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        let converted = self.convert_path(job, input, &on_progress, cancel);
        let data = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, converted).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(JobFailure::new(
                        ErrorCode::Timeout,
                        format!("Conversion exceeded {}s", limit.as_secs_f64()),
                    ))
                }
            },
            None => converted.await?,
        };

        // Not bounded by the timeout: an interrupted write would orphan a partial file
        let file_name = output_file_name(&job.input.name, &job.target_format);
        let size_bytes = data.len() as u64;
        let location = self
            .sink
            .store(&job.id, &file_name, data)
            .await
            .map_err(|e| JobFailure::new(ErrorCode::StorageFailed, e.to_string()))?;

        Ok(ConversionOutput {
            location,
            file_name,
            size_bytes,
        })
    }

    /// Validate the input and run every hop, returning the final bytes
    async fn convert_path<F>(
        &self,
        job: &Job,
        input: Bytes,
        on_progress: &F,
        cancel: &CancellationToken,
    ) -> Result<Bytes, JobFailure>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        self.checkpoint(VALIDATING, "validating input", on_progress, cancel)
            .await?;
        if input.is_empty() {
            return Err(JobFailure::new(
                ErrorCode::InvalidInput,
                format!("Input {} is empty", job.input.name),
            ));
        }

        let ranges = progress_ranges(&job.path.hops);
        let mut data = input;
        for (hop, (start, end)) in job.path.hops.iter().zip(ranges) {
            self.checkpoint(
                start,
                &format!("converting {} to {}", hop.from, hop.to),
                on_progress,
                cancel,
            )
            .await?;
            data = self.run_hop(job, hop, data, cancel).await?;
            self.checkpoint(
                end,
                &format!("{} to {} finished", hop.from, hop.to),
                on_progress,
                cancel,
            )
            .await?;
        }

        self.checkpoint(FINALIZING, "finalizing", on_progress, cancel)
            .await?;
        Ok(data)
    }

    /// Run one collaborator call in its own task so a panic surfaces as a
    /// join error and cancellation can abort it.
    async fn run_hop(
        &self,
        job: &Job,
        hop: &Hop,
        input: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, JobFailure> {
        let converter = self.registry.get(&hop.from, &hop.to).ok_or_else(|| {
            JobFailure::new(
                ErrorCode::ConverterMissing,
                format!("No converter registered for {} -> {}", hop.from, hop.to),
            )
        })?;

        let request = ConvertRequest {
            job_id: job.id.clone(),
            input_name: job.input.name.clone(),
            from: hop.from.clone(),
            to: hop.to.clone(),
            options: job.options.clone(),
        };

        tracing::debug!(job_id = %job.id, from = %hop.from, to = %hop.to, "Starting conversion hop");

        let mut handle =
            tokio::spawn(async move { converter.convert(input, &request).await });
        // Dropping this future (cancel, timeout) must stop the collaborator too
        let _guard = AbortOnDrop(handle.abort_handle());

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            joined = &mut handle => joined,
        };

        let output = match joined {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job.id, from = %hop.from, to = %hop.to, error = %e, "Conversion hop failed");
                return Err(JobFailure::new(
                    ErrorCode::ConverterFailed,
                    format!("{} -> {}: {}", hop.from, hop.to, e),
                ));
            }
            Err(join_err) => {
                return Err(JobFailure::new(
                    ErrorCode::Internal,
                    format!("Converter task for {} -> {} panicked: {}", hop.from, hop.to, join_err),
                ));
            }
        };

        if output.is_empty() {
            return Err(JobFailure::new(
                ErrorCode::EmptyOutput,
                format!("Converter {} -> {} produced no data", hop.from, hop.to),
            ));
        }

        Ok(output)
    }

    async fn checkpoint<F>(
        &self,
        percent: u8,
        message: &str,
        on_progress: &F,
        cancel: &CancellationToken,
    ) -> Result<(), JobFailure>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if !self.config.pacing.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.pacing) => {}
                _ = cancel.cancelled() => return Err(cancelled()),
            }
        }
        on_progress(percent, message);
        Ok(())
    }
}

struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn cancelled() -> JobFailure {
    JobFailure::new(ErrorCode::Cancelled, "Job was cancelled by request")
}

/// Progress range of each hop.
///
/// A single hop spans 40..80. Two hops share 20..90, split in proportion to
/// their estimated durations.
fn progress_ranges(hops: &[Hop]) -> Vec<(u8, u8)> {
    match hops {
        [] => Vec::new(),
        [_] => vec![(DIRECT_START, DIRECT_END)],
        [first, second] => {
            let span = u64::from(CHAIN_END - CHAIN_START);
            let d1 = u64::from(first.estimated_duration_secs);
            let total = d1 + u64::from(second.estimated_duration_secs);
            let share = if total == 0 { span / 2 } else { span * d1 / total };
            let split = (u64::from(CHAIN_START) + share).min(u64::from(CHAIN_END)) as u8;
            vec![(CHAIN_START, split), (split, CHAIN_END)]
        }
        _ => {
            // not produced by the resolver; spread evenly
            let span = u32::from(CHAIN_END - CHAIN_START);
            let n = hops.len() as u32;
            (0..n)
                .map(|i| {
                    let start = CHAIN_START + (span * i / n) as u8;
                    let end = CHAIN_START + (span * (i + 1) / n) as u8;
                    (start, end)
                })
                .collect()
        }
    }
}

/// `<input stem>.<target>`
fn output_file_name(input_name: &str, target: &str) -> String {
    let stem = Path::new(input_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("output");
    format!("{}.{}", stem, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FormatCatalog;
    use crate::encode::{ConverterError, FnConverter};
    use crate::jobs::{InputDescriptor, JobOptions};
    use crate::route::RouteResolver;
    use crate::sink::{MemorySink, SinkError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_job(from: &str, to: &str) -> Job {
        let resolver = RouteResolver::new(Arc::new(FormatCatalog::builtin()));
        let path = resolver.resolve(from, to).unwrap();
        Job::new(
            InputDescriptor {
                name: format!("report.{}", from),
                format: from.to_string(),
                size_bytes: 5,
            },
            to.to_string(),
            JobOptions::default(),
            path,
            0,
        )
    }

    type Ready = std::future::Ready<Result<Bytes, ConverterError>>;
    type Pending = std::future::Pending<Result<Bytes, ConverterError>>;

    /// Converter that appends `>to` to its input
    fn tagging() -> FnConverter<impl Fn(Bytes, ConvertRequest) -> Ready + Send + Sync> {
        FnConverter::new(|input: Bytes, req: ConvertRequest| {
            let mut out = input.to_vec();
            out.extend_from_slice(format!(">{}", req.to).as_bytes());
            std::future::ready(Ok(Bytes::from(out)))
        })
    }

    fn never_finishes() -> FnConverter<impl Fn(Bytes, ConvertRequest) -> Pending + Send + Sync> {
        FnConverter::new(|_input: Bytes, _req: ConvertRequest| std::future::pending())
    }

    fn executor(registry: ConverterRegistry, sink: Arc<MemorySink>) -> ConversionExecutor {
        ConversionExecutor::new(Arc::new(registry), sink)
    }

    fn recorder() -> (Arc<Mutex<Vec<(u8, String)>>>, impl Fn(u8, &str) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |p: u8, m: &str| sink.lock().push((p, m.to_string())))
    }

    #[tokio::test]
    async fn test_direct_path_runs_one_hop() {
        let mut registry = ConverterRegistry::new();
        registry.register("epub", "pdf", tagging());
        let sink = Arc::new(MemorySink::new());
        let exec = executor(registry, sink.clone());
        let job = create_test_job("epub", "pdf");
        let (events, on_progress) = recorder();

        let out = exec
            .execute(&job, Bytes::from_static(b"book"), on_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.file_name, "report.pdf");
        assert_eq!(sink.get(&out.location).unwrap(), Bytes::from_static(b"book>pdf"));
        assert_eq!(out.size_bytes, 8);

        let percents: Vec<u8> = events.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, vec![10, 40, 80, 95]);
    }

    #[tokio::test]
    async fn test_intermediate_path_chains_hops_and_splits_progress() {
        let mut registry = ConverterRegistry::new();
        registry.register("doc", "html", tagging());
        registry.register("html", "epub", tagging());
        let sink = Arc::new(MemorySink::new());
        let exec = executor(registry, sink.clone());
        let job = create_test_job("doc", "epub");
        let (events, on_progress) = recorder();

        let out = exec
            .execute(&job, Bytes::from_static(b"memo"), on_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.get(&out.location).unwrap(), Bytes::from_static(b"memo>html>epub"));

        // 45s + 15s: the first hop gets 3/4 of 20..90
        let percents: Vec<u8> = events.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, vec![10, 20, 72, 72, 90, 95]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_identity_path_passes_input_through() {
        let sink = Arc::new(MemorySink::new());
        let exec = executor(ConverterRegistry::new(), sink.clone());
        let job = create_test_job("pdf", "pdf");
        let (events, on_progress) = recorder();

        let out = exec
            .execute(&job, Bytes::from_static(b"%PDF-1.7"), on_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.get(&out.location).unwrap(), Bytes::from_static(b"%PDF-1.7"));
        let percents: Vec<u8> = events.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, vec![10, 95]);
    }

    #[tokio::test]
    async fn test_missing_converter_fails() {
        let sink = Arc::new(MemorySink::new());
        let exec = executor(ConverterRegistry::new(), sink.clone());
        let job = create_test_job("epub", "pdf");

        let err = exec
            .execute(&job, Bytes::from_static(b"book"), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ConverterMissing);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_first_hop_failure_aborts_chain() {
        let second_calls = Arc::new(AtomicUsize::new(0));
        let counter = second_calls.clone();

        let mut registry = ConverterRegistry::new();
        registry.register(
            "doc",
            "html",
            FnConverter::new(|_input: Bytes, _req: ConvertRequest| async move {
                Err::<Bytes, _>(ConverterError::Rejected("corrupt OLE header".into()))
            }),
        );
        registry.register(
            "html",
            "epub",
            FnConverter::new(move |input: Bytes, _req: ConvertRequest| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ConverterError>(input) }
            }),
        );
        let sink = Arc::new(MemorySink::new());
        let exec = executor(registry, sink.clone());
        let job = create_test_job("doc", "epub");

        let err = exec
            .execute(&job, Bytes::from_static(b"memo"), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ConverterFailed);
        assert!(err.message.contains("corrupt OLE header"));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_empty_output_and_input_are_rejected() {
        let mut registry = ConverterRegistry::new();
        registry.register(
            "epub",
            "pdf",
            FnConverter::new(|_input: Bytes, _req: ConvertRequest| async move {
                Ok::<_, ConverterError>(Bytes::new())
            }),
        );
        let exec = executor(registry, Arc::new(MemorySink::new()));
        let job = create_test_job("epub", "pdf");

        let err = exec
            .execute(&job, Bytes::from_static(b"book"), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyOutput);

        let err = exec
            .execute(&job, Bytes::new(), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_panicking_converter_is_internal_failure() {
        let mut registry = ConverterRegistry::new();
        registry.register(
            "epub",
            "pdf",
            FnConverter::new(|_input: Bytes, _req: ConvertRequest| async move {
                if true {
                    panic!("encoder bug");
                }
                Ok::<_, ConverterError>(Bytes::new())
            }),
        );
        let exec = executor(registry, Arc::new(MemorySink::new()));
        let job = create_test_job("epub", "pdf");

        let err = exec
            .execute(&job, Bytes::from_static(b"book"), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_hop() {
        let mut registry = ConverterRegistry::new();
        registry.register("epub", "pdf", never_finishes());
        let exec = Arc::new(executor(registry, Arc::new(MemorySink::new())));
        let job = create_test_job("epub", "pdf");
        let token = CancellationToken::new();

        let task = {
            let exec = exec.clone();
            let token = token.clone();
            tokio::spawn(async move {
                exec.execute(&job, Bytes::from_static(b"book"), |_, _| {}, &token)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("cancel should stop the hop")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_nothing() {
        let exec = executor(ConverterRegistry::new(), Arc::new(MemorySink::new()));
        let job = create_test_job("epub", "pdf");
        let token = CancellationToken::new();
        token.cancel();
        let (events, on_progress) = recorder();

        let err = exec
            .execute(&job, Bytes::from_static(b"book"), on_progress, &token)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_job() {
        let mut registry = ConverterRegistry::new();
        registry.register("epub", "pdf", never_finishes());
        let exec = ConversionExecutor::with_config(
            Arc::new(registry),
            Arc::new(MemorySink::new()),
            ExecutorConfig {
                pacing: Duration::ZERO,
                timeout: Some(Duration::from_millis(50)),
            },
        );
        let job = create_test_job("epub", "pdf");

        let err = exec
            .execute(&job, Bytes::from_static(b"book"), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    /// Holds each write for a while before handing it to a memory sink
    struct SlowSink {
        inner: MemorySink,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ArtifactSink for SlowSink {
        async fn store(&self, job_id: &str, file_name: &str, data: Bytes) -> Result<String, SinkError> {
            tokio::time::sleep(self.delay).await;
            self.inner.store(job_id, file_name, data).await
        }

        async fn discard(&self, location: &str) -> Result<(), SinkError> {
            self.inner.discard(location).await
        }
    }

    #[tokio::test]
    async fn test_timeout_does_not_interrupt_storage() {
        let mut registry = ConverterRegistry::new();
        registry.register("epub", "pdf", tagging());
        let sink = Arc::new(SlowSink {
            inner: MemorySink::new(),
            delay: Duration::from_millis(150),
        });
        let exec = ConversionExecutor::with_config(
            Arc::new(registry),
            sink.clone(),
            ExecutorConfig {
                pacing: Duration::ZERO,
                timeout: Some(Duration::from_millis(30)),
            },
        );
        let job = create_test_job("epub", "pdf");

        let out = exec
            .execute(&job, Bytes::from_static(b"book"), |_, _| {}, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            sink.inner.get(&out.location).unwrap(),
            Bytes::from_static(b"book>pdf")
        );
    }

    #[test]
    fn test_progress_ranges() {
        let hop = |secs| Hop {
            from: "a".into(),
            to: "b".into(),
            estimated_duration_secs: secs,
            quality_loss: crate::catalog::QualityLoss::None,
        };
        assert!(progress_ranges(&[]).is_empty());
        assert_eq!(progress_ranges(&[hop(5)]), vec![(40, 80)]);
        assert_eq!(progress_ranges(&[hop(10), hop(10)]), vec![(20, 55), (55, 90)]);
        assert_eq!(progress_ranges(&[hop(0), hop(0)]), vec![(20, 55), (55, 90)]);
        assert_eq!(progress_ranges(&[hop(0), hop(30)]), vec![(20, 20), (20, 90)]);
        assert_eq!(progress_ranges(&[hop(100_000_000), hop(1)]), vec![(20, 89), (89, 90)]);
        assert_eq!(progress_ranges(&[hop(u32::MAX), hop(u32::MAX)]), vec![(20, 55), (55, 90)]);
        assert_eq!(progress_ranges(&[hop(u32::MAX), hop(0)]), vec![(20, 90), (90, 90)]);
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("novel.epub", "pdf"), "novel.pdf");
        assert_eq!(output_file_name("archive.tar.gz", "txt"), "archive.tar.txt");
        assert_eq!(output_file_name("", "html"), "output.html");
    }
}
