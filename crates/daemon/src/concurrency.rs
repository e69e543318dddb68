//! Worker pool sizing
//!
//! Derives how many pipelines may run at once from the core count and configuration.

use crate::config::Config;

/// Worker plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of pipelines running at once
    pub pool_size: u32,
    /// Capacity of the submission channel
    pub queue_capacity: usize,
}

impl WorkerPlan {
    /// Derive a worker plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - An explicit non-zero `max_concurrent_jobs` is used unchanged
    /// - Otherwise 1 job below 8 cores, 2 jobs for 8-15 cores, 4 jobs for 16+ cores
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .workers
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32);

        let pool_size = if cfg.workers.max_concurrent_jobs > 0 {
            cfg.workers.max_concurrent_jobs
        } else {
            derive_pool_size(total_cores)
        };

        Self {
            total_cores,
            pool_size,
            queue_capacity: cfg.workers.queue_capacity.max(1),
        }
    }
}

/// libx264 already spreads one encode across many threads, so jobs scale slowly with cores
fn derive_pool_size(cores: u32) -> u32 {
    match cores {
        0..=7 => 1,
        8..=15 => 2,
        _ => 4,
    }
}

/// Public function to derive a worker plan from configuration
pub fn derive_plan(cfg: &Config) -> WorkerPlan {
    WorkerPlan::derive(cfg)
}
