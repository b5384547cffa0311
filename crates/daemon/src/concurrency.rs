//! Concurrency planning module for docroute
//!
//! Derives the admission cap from configuration and CPU core count.

use crate::config::Config;

/// Upper bound used when the cap is derived from the core count
pub const DEFAULT_MAX_CONCURRENT_JOBS: u32 = 5;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of jobs in {pending, processing} at once
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// An explicit non-zero `jobs.max_concurrent_jobs` is used unchanged.
    /// Zero derives `min(cores, 5)`, never less than 1.
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get() as u32)
    }

    pub fn derive_with_cores(cfg: &Config, total_cores: u32) -> Self {
        let max_concurrent_jobs = if cfg.jobs.max_concurrent_jobs > 0 {
            cfg.jobs.max_concurrent_jobs
        } else {
            derive_max_jobs(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_jobs,
        }
    }
}

fn derive_max_jobs(cores: u32) -> u32 {
    cores.clamp(1, DEFAULT_MAX_CONCURRENT_JOBS)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
