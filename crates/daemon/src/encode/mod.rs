//! Encoder/decoder collaborators for docroute
//!
//! The core never transforms bytes itself. Each conversion hop `(from, to)`
//! is delegated to a [`Converter`] looked up in a [`ConverterRegistry`].

pub mod command;

pub use command::CommandConverter;

use crate::catalog::normalize_id;
use crate::config::ConverterConfig;
use crate::jobs::JobOptions;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error type for collaborator calls
#[derive(Debug, Error)]
pub enum ConverterError {
    /// External program exited with non-zero status
    #[error("{program} failed with exit code {code}: {stderr}")]
    ProgramFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    /// External program was terminated by signal
    #[error("{program} was terminated by signal")]
    Terminated { program: String },

    /// External program exited cleanly but wrote nothing where expected
    #[error("Converter produced no output file at {0}")]
    MissingOutput(PathBuf),

    /// Input could not be converted (malformed, unsupported feature, ...)
    #[error("Conversion rejected: {0}")]
    Rejected(String),

    /// IO error while staging input or reading output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a collaborator is asked to do for one hop
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub job_id: String,
    /// Original input file name, for tools that care about extensions
    pub input_name: String,
    pub from: String,
    pub to: String,
    pub options: JobOptions,
}

/// One hop's byte-level conversion
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, input: Bytes, request: &ConvertRequest) -> Result<Bytes, ConverterError>;
}

/// Adapts an async closure into a [`Converter`].
pub struct FnConverter<F> {
    f: F,
}

impl<F, Fut> FnConverter<F>
where
    F: Fn(Bytes, ConvertRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, ConverterError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Converter for FnConverter<F>
where
    F: Fn(Bytes, ConvertRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, ConverterError>> + Send,
{
    async fn convert(&self, input: Bytes, request: &ConvertRequest) -> Result<Bytes, ConverterError> {
        (self.f)(input, request.clone()).await
    }
}

/// Maps conversion hops to the collaborators that perform them
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<(String, String), Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry of external-program converters from configuration
    pub fn from_config(converters: &[ConverterConfig]) -> Self {
        let mut registry = Self::new();
        for cfg in converters {
            registry.register(
                &cfg.from,
                &cfg.to,
                CommandConverter::new(cfg.program.clone(), cfg.args.clone()),
            );
        }
        registry
    }

    /// Register (or replace) the converter for `from -> to`
    pub fn register<C: Converter + 'static>(&mut self, from: &str, to: &str, converter: C) {
        self.register_arc(from, to, Arc::new(converter));
    }

    pub fn register_arc(&mut self, from: &str, to: &str, converter: Arc<dyn Converter>) {
        self.converters
            .insert((normalize_id(from), normalize_id(to)), converter);
    }

    pub fn get(&self, from: &str, to: &str) -> Option<Arc<dyn Converter>> {
        self.converters
            .get(&(normalize_id(from), normalize_id(to)))
            .cloned()
    }

    /// Registered hops, sorted
    pub fn hops(&self) -> Vec<(String, String)> {
        let mut hops: Vec<_> = self.converters.keys().cloned().collect();
        hops.sort();
        hops
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("hops", &self.hops())
            .finish()
    }
}
