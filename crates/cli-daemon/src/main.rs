//! CLI entry point for docroute
//!
//! Runs the daemon, or answers catalog and routing questions and performs a
//! single conversion in-process.

use bytes::Bytes;
use clap::{Parser, Subcommand};
use docroute::server::format_from_extension;
use docroute::{Config, Daemon, FormatCatalog, JobInput, JobOptions, JobStatus, RouteResolver};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// docroute - document format conversion routing daemon
#[derive(Parser, Debug)]
#[command(name = "docroute")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults plus DOCROUTE_* env when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging for docroute
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and cleanup loop until Ctrl-C
    Serve {
        /// Skip startup checks (converter programs, hop routability)
        #[arg(long)]
        skip_checks: bool,
    },
    /// List catalog formats and their targets
    Formats,
    /// Show the route between two formats
    Route { from: String, to: String },
    /// Estimate conversion time for a file size in bytes
    Estimate { from: String, to: String, size: u64 },
    /// Convert one file using the configured converters
    Convert {
        input: PathBuf,
        /// Target format id
        #[arg(long)]
        to: String,
        /// Source format id (defaults to the input's extension)
        #[arg(long)]
        from: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path).map_err(|e| e.to_string()),
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

fn resolver(config: &Config) -> RouteResolver {
    RouteResolver::with_strategy(Arc::new(FormatCatalog::builtin()), config.routing.strategy)
}

async fn serve(config: Config, skip_checks: bool) -> Result<(), String> {
    let daemon = if skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        Daemon::with_config(config).map_err(|e| e.to_string())?
    };

    println!(
        "docroute listening on http://{} ({} max concurrent jobs)",
        daemon.config.server.bind, daemon.concurrency_plan.max_concurrent_jobs
    );
    daemon.run_with_server().await.map_err(|e| e.to_string())
}

fn formats(config: &Config) {
    let resolver = resolver(config);
    for format in resolver.catalog().list_all() {
        let targets = resolver.supported_targets(&format.id);
        println!("{:<6} {:<28} -> {}", format.id, format.name, targets.join(", "));
    }
}

fn route(config: &Config, from: &str, to: &str) -> Result<(), String> {
    let path = resolver(config).resolve(from, to).map_err(|e| e.to_string())?;
    if path.is_identity() {
        println!("{} -> {}: identity (no conversion)", path.from, path.to);
        return Ok(());
    }
    for hop in &path.hops {
        println!(
            "  {} -> {} (~{}s, {} loss)",
            hop.from, hop.to, hop.estimated_duration_secs, hop.quality_loss
        );
    }
    println!(
        "total ~{}s, {} loss",
        path.estimated_duration_secs, path.quality_loss
    );
    Ok(())
}

fn estimate(config: &Config, from: &str, to: &str, size: u64) -> Result<(), String> {
    let secs = resolver(config)
        .estimate_duration(from, to, size)
        .map_err(|e| e.to_string())?;
    println!("{:.1}s", secs);
    Ok(())
}

async fn convert(
    config: Config,
    input: &Path,
    to: &str,
    from: Option<String>,
) -> Result<(), String> {
    let from = from
        .or_else(|| format_from_extension(input))
        .ok_or_else(|| format!("Cannot infer format of {}; pass --from", input.display()))?;
    let data = tokio::fs::read(input)
        .await
        .map_err(|e| format!("Cannot read {}: {}", input.display(), e))?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("input.{}", from));

    let manager = Daemon::new_without_checks(config).manager();
    let mut events = manager.subscribe();
    let id = manager
        .submit(JobInput::new(name, from, Bytes::from(data)), to, JobOptions::default())
        .map_err(|e| e.to_string())?;

    let job = manager
        .follow(&mut events, &id, |event| {
            println!("[{:>3}%] {}", event.percent, event.message)
        })
        .await
        .ok_or_else(|| format!("Job {} disappeared", id))?;

    match (job.status, job.result, job.error) {
        (JobStatus::Completed, Some(output), _) => {
            println!("{} ({} bytes)", output.location, output.size_bytes);
            Ok(())
        }
        (_, _, Some(error)) => Err(error.to_string()),
        (status, _, _) => Err(format!("Job ended as {}", status)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "docroute=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Serve { skip_checks } => serve(config, skip_checks).await,
        Command::Formats => {
            formats(&config);
            Ok(())
        }
        Command::Route { from, to } => route(&config, &from, &to),
        Command::Estimate { from, to, size } => estimate(&config, &from, &to, size),
        Command::Convert { input, to, from } => convert(config, &input, &to, from).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
