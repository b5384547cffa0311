//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Job lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Admission cap on pending + processing jobs (0 = derive from CPU count)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    /// How long terminal jobs stay in the table, in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Period of the background cleanup sweep, in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Wall-clock limit for one conversion (0 = no limit)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay inserted between progress checkpoints
    #[serde(default)]
    pub progress_pacing_ms: u64,
}

fn default_max_concurrent_jobs() -> u32 {
    5
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            timeout_secs: default_timeout_secs(),
            progress_pacing_ms: 0,
        }
    }
}

/// How the resolver picks among several one-hop routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// First intermediate candidate in edge declaration order wins.
    #[default]
    FirstMatch,
    /// Lowest combined quality loss, then lowest duration, then declaration order.
    LowestCost,
}

impl RoutingStrategy {
    /// Parse the snake_case name used in config files and env vars.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "first_match" | "first-match" => Some(Self::FirstMatch),
            "lowest_cost" | "lowest-cost" => Some(Self::LowestCost),
            _ => None,
        }
    }
}

/// Route resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Socket address the API binds to
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Output artifact storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/docroute")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// One external program bound to a single conversion hop.
///
/// `args` may contain the placeholders `{input}`, `{output}`, `{from}` and `{to}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConverterConfig {
    pub from: String,
    pub to: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub converters: Vec<ConverterConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - DOCROUTE_MAX_CONCURRENT_JOBS -> jobs.max_concurrent_jobs
    /// - DOCROUTE_RETENTION_SECS -> jobs.retention_secs
    /// - DOCROUTE_CLEANUP_INTERVAL_SECS -> jobs.cleanup_interval_secs
    /// - DOCROUTE_TIMEOUT_SECS -> jobs.timeout_secs
    /// - DOCROUTE_PROGRESS_PACING_MS -> jobs.progress_pacing_ms
    /// - DOCROUTE_ROUTING_STRATEGY -> routing.strategy
    /// - DOCROUTE_BIND -> server.bind
    /// - DOCROUTE_OUTPUT_DIR -> storage.output_dir
    ///
    /// Unparseable values are ignored and the existing value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u32>("DOCROUTE_MAX_CONCURRENT_JOBS") {
            self.jobs.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parse::<u64>("DOCROUTE_RETENTION_SECS") {
            self.jobs.retention_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DOCROUTE_CLEANUP_INTERVAL_SECS") {
            self.jobs.cleanup_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DOCROUTE_TIMEOUT_SECS") {
            self.jobs.timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DOCROUTE_PROGRESS_PACING_MS") {
            self.jobs.progress_pacing_ms = v;
        }

        if let Ok(val) = env::var("DOCROUTE_ROUTING_STRATEGY") {
            if let Some(strategy) = RoutingStrategy::parse(&val) {
                self.routing.strategy = strategy;
            }
        }

        if let Ok(val) = env::var("DOCROUTE_BIND") {
            if !val.trim().is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("DOCROUTE_OUTPUT_DIR") {
            if !val.trim().is_empty() {
                self.storage.output_dir = PathBuf::from(val);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
