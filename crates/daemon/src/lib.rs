//! vidprep daemon
//!
//! Background service that derives metadata, a poster frame and a sampled
//! preview clip from uploaded videos, and reports per-job progress.

pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod job_executor;
pub mod metrics;
pub mod probe;
pub mod process;
pub mod startup;
pub mod status_server;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use vidprep_config as config;
pub use vidprep_config::Config;
pub use concurrency::{derive_plan, WorkerPlan};
pub use daemon::{validate_job_id, Daemon, DaemonError, SubmitError};
pub use encode::{ArtifactError, PreviewPlan};
pub use job_executor::{JobError, JobExecutor, ProcessingJob};
pub use metrics::{new_shared_metrics, MetricsSnapshot, SharedMetrics};
pub use probe::{extract_metadata, MediaMetadata, MetadataError};
pub use process::{SystemToolRunner, ToolCommand, ToolError, ToolOutcome, ToolRunner};
pub use startup::{parse_ffmpeg_version, run_startup_checks, StartupError};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use tracker::{Artifacts, JobSnapshot, JobStatus, JobTracker, TrackerError};
