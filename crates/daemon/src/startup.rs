//! Startup checks module for docroute
//!
//! Preflight checks run before the daemon accepts work:
//! - every configured converter program resolves on `PATH`
//! - every configured hop is one some catalog route actually uses
//! - the output directory can be created

use crate::catalog::{normalize_id, FormatCatalog};
use crate::config::{Config, ConverterConfig};
use std::path::PathBuf;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Converter program '{program}' for {from} -> {to} not found: {reason}")]
    ConverterUnavailable {
        program: String,
        from: String,
        to: String,
        reason: String,
    },

    #[error("Converter configured for unknown format '{0}'")]
    UnknownFormat(String),

    #[error("Converter hop {from} -> {to} is not used by any catalog route")]
    UnroutableHop { from: String, to: String },

    #[error("Output directory {path} is not usable: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Check that a converter's program can be found
pub fn check_converter_program(cfg: &ConverterConfig) -> Result<PathBuf, StartupError> {
    which::which(&cfg.program).map_err(|e| StartupError::ConverterUnavailable {
        program: cfg.program.clone(),
        from: cfg.from.clone(),
        to: cfg.to.clone(),
        reason: e.to_string(),
    })
}

/// Check that `from -> to` is a hop the resolver can ever hand to a
/// collaborator: a direct edge, or the first leg of an intermediate edge.
pub fn check_hop_routable(catalog: &FormatCatalog, from: &str, to: &str) -> Result<(), StartupError> {
    let (from, to) = (normalize_id(from), normalize_id(to));
    for id in [&from, &to] {
        if !catalog.contains(id) {
            return Err(StartupError::UnknownFormat(id.clone()));
        }
    }

    let direct = catalog.direct_edge(&from, &to).is_some();
    let first_leg = catalog
        .intermediate_edges_from(&from)
        .any(|edge| edge.intermediate.as_deref() == Some(to.as_str()));

    if direct || first_leg {
        Ok(())
    } else {
        Err(StartupError::UnroutableHop { from, to })
    }
}

pub fn check_output_dir(cfg: &Config) -> Result<(), StartupError> {
    let path = &cfg.storage.output_dir;
    std::fs::create_dir_all(path).map_err(|source| StartupError::OutputDir {
        path: path.clone(),
        source,
    })
}

/// Run all startup checks in order
///
/// 1. Hop routability (pure, catalog only)
/// 2. Converter programs on PATH
/// 3. Output directory
pub fn run_startup_checks(cfg: &Config, catalog: &FormatCatalog) -> Result<(), StartupError> {
    for converter in &cfg.converters {
        check_hop_routable(catalog, &converter.from, &converter.to)?;
    }
    for converter in &cfg.converters {
        let resolved = check_converter_program(converter)?;
        tracing::debug!(
            program = %converter.program,
            path = %resolved.display(),
            from = %converter.from,
            to = %converter.to,
            "Converter program found"
        );
    }
    check_output_dir(cfg)?;
    Ok(())
}
