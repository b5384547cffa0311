//! docroute
//!
//! Document-format conversion routing engine: a static format catalog, a
//! route resolver over its edge table, an executor that drives external
//! converters hop by hop, and a job manager with admission control,
//! cancellation, history and eviction.

pub mod catalog;
pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod job_executor;
pub mod jobs;
pub mod manager;
pub mod metrics;
pub mod route;
pub mod server;
pub mod sink;
pub mod startup;

pub use docroute_config as config;
pub use docroute_config::Config;
pub use catalog::{
    CatalogError, Complexity, ConversionEdge, ConversionMethod, Format, FormatCapabilities,
    FormatCatalog, QualityLoss,
};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{Daemon, DaemonError};
pub use encode::{
    CommandConverter, ConvertRequest, Converter, ConverterError, ConverterRegistry, FnConverter,
};
pub use job_executor::{ConversionExecutor, ConversionOutput, ExecutorConfig};
pub use jobs::{
    ErrorCode, InputDescriptor, Job, JobFailure, JobOptions, JobStatus, OutputDescriptor,
    QualityTier,
};
pub use manager::{JobInput, JobManager, ManagerConfig, ProgressEvent, SubmitError};
pub use metrics::{JobMetrics, MetricsSnapshot};
pub use route::{ConversionPath, Hop, RouteError, RouteResolver};
pub use server::{create_router, run_server, ServerError};
pub use sink::{ArtifactSink, DirectorySink, MemorySink, SinkError};
pub use startup::{run_startup_checks, StartupError};
