//! Metrics module for vidprep
//!
//! Aggregate counters served by `GET /metrics`.

use crate::tracker::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Aggregate pipeline statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    /// Submitted runs waiting for a worker slot
    pub queue_len: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    /// Poster/preview/probe steps that failed without failing their job
    pub degraded_steps: u64,
    pub pool_size: u32,
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Create a new shared metrics instance
pub fn new_shared_metrics(pool_size: u32) -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot {
        pool_size,
        timestamp_unix_ms: current_timestamp_ms(),
        ..MetricsSnapshot::default()
    }))
}

/// Apply `f` to the snapshot and stamp it with the current time
pub async fn update_metrics<F>(metrics: &SharedMetrics, f: F)
where
    F: FnOnce(&mut MetricsSnapshot),
{
    let mut snapshot = metrics.write().await;
    f(&mut snapshot);
    snapshot.timestamp_unix_ms = current_timestamp_ms();
}
