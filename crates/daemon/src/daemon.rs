//! Daemon startup and main loop for docroute
//!
//! Wires the catalog, resolver, converter registry, artifact sink, executor
//! and job manager together, then runs the cleanup sweep and the HTTP API
//! until shutdown.

use crate::catalog::FormatCatalog;
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::encode::ConverterRegistry;
use crate::job_executor::{ConversionExecutor, ExecutorConfig};
use crate::manager::{JobManager, ManagerConfig};
use crate::route::RouteResolver;
use crate::server::{run_server, ServerError};
use crate::sink::{ArtifactSink, DirectorySink};
use crate::startup::{run_startup_checks, StartupError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Server task panicked or was aborted
    #[error("Server task failed: {0}")]
    ServerTask(#[from] tokio::task::JoinError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    pub manager: JobManager,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// 1. Load config from file and apply environment overrides
    /// 2. Run startup checks against the built-in catalog
    /// 3. Derive the concurrency plan and build the job manager
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config, &FormatCatalog::builtin())?;
        let sink = Arc::new(DirectorySink::new(config.storage.output_dir.clone()));
        Ok(Self::assemble(config, sink))
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when converter programs are not installed.
    pub fn new_without_checks(config: Config) -> Self {
        let sink = Arc::new(DirectorySink::new(config.storage.output_dir.clone()));
        Self::assemble(config, sink)
    }

    /// Build the component graph around a caller-chosen sink
    pub fn assemble(config: Config, sink: Arc<dyn ArtifactSink>) -> Self {
        let registry = ConverterRegistry::from_config(&config.converters);
        Self::assemble_with_registry(config, registry, sink)
    }

    pub fn assemble_with_registry(
        config: Config,
        registry: ConverterRegistry,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        let concurrency_plan = derive_plan(&config);
        let catalog = Arc::new(FormatCatalog::builtin());
        let resolver = Arc::new(RouteResolver::with_strategy(catalog, config.routing.strategy));

        let executor = Arc::new(ConversionExecutor::with_config(
            Arc::new(registry),
            sink,
            executor_config(&config),
        ));
        let manager = JobManager::new(
            resolver,
            executor,
            ManagerConfig {
                max_concurrent_jobs: concurrency_plan.max_concurrent_jobs as usize,
                retention: Duration::from_secs(config.jobs.retention_secs),
            },
        );

        tracing::info!(
            max_concurrent_jobs = concurrency_plan.max_concurrent_jobs,
            total_cores = concurrency_plan.total_cores,
            strategy = ?config.routing.strategy,
            converters = config.converters.len(),
            "Daemon initialized"
        );

        Self {
            config,
            concurrency_plan,
            manager,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> JobManager {
        self.manager.clone()
    }

    /// Token that stops the cleanup loop and the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the periodic cleanup sweep
    ///
    /// Evicts expired jobs and discards their artifacts every
    /// `cleanup_interval_secs` until shutdown.
    pub fn start_cleanup_loop(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.manager.clone();
        let shutdown = self.shutdown.clone();
        let period = Duration::from_secs(self.config.jobs.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                }
            }
        })
    }

    /// Start the HTTP API as a background task
    pub fn start_server(&self) -> tokio::task::JoinHandle<Result<(), ServerError>> {
        let manager = self.manager.clone();
        let bind = self.config.server.bind.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { run_server(manager, &bind, shutdown).await })
    }

    /// Run the cleanup loop and the API until Ctrl-C or the shutdown token
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let cleanup = self.start_cleanup_loop();
        let mut server = self.start_server();

        let result = tokio::select! {
            joined = &mut server => Some(joined),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                None
            }
            _ = self.shutdown.cancelled() => None,
        };

        self.shutdown.cancel();
        let _ = cleanup.await;
        let served = match result {
            Some(joined) => joined,
            None => server.await,
        };

        server_outcome(served)
    }
}

fn server_outcome(
    joined: Result<Result<(), ServerError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match joined {
        Ok(outcome) => outcome.map_err(DaemonError::from),
        Err(join_err) => {
            tracing::error!(error = %join_err, "Server task panicked");
            Err(DaemonError::ServerTask(join_err))
        }
    }
}

fn executor_config(config: &Config) -> ExecutorConfig {
    ExecutorConfig {
        pacing: Duration::from_millis(config.jobs.progress_pacing_ms),
        timeout: match config.jobs.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    }
}
