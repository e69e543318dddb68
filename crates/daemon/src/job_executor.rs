//! Job executor module for vidprep
//!
//! Runs the processing pipeline for one job at a time per permit, with the
//! number of permits taken from the worker plan.

use crate::concurrency::WorkerPlan;
use crate::config::{ProcessingSettings, StorageConfig, ToolsConfig};
use crate::encode::{
    adopt, generate_poster, generate_preview, poster_destination, preview_destination,
    ArtifactError,
};
use crate::metrics::{update_metrics, SharedMetrics};
use crate::probe::{extract_metadata, MetadataError};
use crate::process::ToolRunner;
use crate::tracker::{Artifacts, JobTracker, TrackerError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Error type for job execution operations
#[derive(Debug, Error)]
pub enum JobError {
    /// The source could not be read
    #[error("{0}")]
    Metadata(#[from] MetadataError),

    /// Failed to create the run workspace
    #[error("Failed to create run workspace: {0}")]
    Workspace(io::Error),

    /// The tracker refused an update
    #[error("Job tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// The worker pool was shut down
    #[error("Worker pool closed")]
    PoolClosed,
}

/// One run of the pipeline, as handed from the dispatcher to a worker
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    /// Job identifier and single-flight key
    pub id: String,
    /// Path to the source video
    pub source_path: PathBuf,
    /// Identifier of this run
    pub task_id: String,
    /// Settings for this run only
    pub settings: ProcessingSettings,
}

/// Progress milestones reported by every run
pub mod milestone {
    pub const STARTED: u8 = 0;
    pub const METADATA: u8 = 10;
    pub const POSTER: u8 = 30;
    pub const PREVIEW: u8 = 60;
    pub const FINALIZING: u8 = 90;
}

/// Job executor that runs pipelines with concurrency limiting
///
/// Uses a tokio Semaphore to limit the number of concurrently running
/// pipelines according to the worker plan.
pub struct JobExecutor {
    /// Semaphore for limiting concurrent runs
    semaphore: Arc<Semaphore>,
    /// Pool size and queue capacity
    plan: WorkerPlan,
    /// Shared metrics state
    metrics: SharedMetrics,
    tracker: Arc<JobTracker>,
    runner: Arc<dyn ToolRunner>,
    tools: ToolsConfig,
    /// Root for adopted artifacts
    media_root: PathBuf,
    /// Base directory for per-run workspaces
    temp_base_dir: PathBuf,
}

impl JobExecutor {
    /// Create a new JobExecutor
    pub fn new(
        plan: WorkerPlan,
        metrics: SharedMetrics,
        tracker: Arc<JobTracker>,
        runner: Arc<dyn ToolRunner>,
        tools: ToolsConfig,
        storage: &StorageConfig,
    ) -> Self {
        let permits = plan.pool_size.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            plan,
            metrics,
            tracker,
            runner,
            tools,
            media_root: storage.media_root.clone(),
            temp_base_dir: storage.temp_dir.clone(),
        }
    }

    /// Get the number of available permits (free worker slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the worker plan
    pub fn plan(&self) -> &WorkerPlan {
        &self.plan
    }

    /// Acquire a permit for job execution
    ///
    /// This will wait until a permit is available if all slots are in use.
    pub async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, JobError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::PoolClosed)
    }

    /// Try to acquire a permit without waiting
    ///
    /// Returns None if no permits are available.
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Execute a run through the pipeline
    ///
    /// 1. Waits for a worker slot
    /// 2. Marks the job running
    /// 3. Extracts metadata (unreadable source is fatal, bad probe is degraded)
    /// 4. Generates the poster, then the preview (failures are degraded)
    /// 5. Completes the job with the verified artifacts
    ///
    /// Any fatal error marks the job failed. The run workspace is removed on
    /// every path.
    pub async fn execute(&self, job: ProcessingJob) -> Result<(), JobError> {
        let _permit = self.acquire_permit().await?;

        update_metrics(&self.metrics, |m| {
            m.queue_len = m.queue_len.saturating_sub(1);
            m.running_jobs += 1;
        })
        .await;

        let result = self.run_pipeline(&job).await;

        match &result {
            Ok(()) => {
                info!(job_id = %job.id, task_id = %job.task_id, "Job completed");
                update_metrics(&self.metrics, |m| m.completed_jobs += 1).await;
            }
            Err(JobError::Tracker(TrackerError::StaleRun { .. })) => {
                // A newer run owns the record; nothing failed.
                debug!(job_id = %job.id, task_id = %job.task_id, "Run superseded, skipping");
            }
            Err(e) => {
                error!(job_id = %job.id, task_id = %job.task_id, error = %e, "Job failed");
                let reason = format!("Error: {}", e);
                if let Err(fail_err) = self.tracker.fail(&job.id, &job.task_id, &reason).await {
                    warn!(job_id = %job.id, error = %fail_err, "Could not record failure");
                }
                update_metrics(&self.metrics, |m| m.failed_jobs += 1).await;
            }
        }

        update_metrics(&self.metrics, |m| {
            m.running_jobs = m.running_jobs.saturating_sub(1);
        })
        .await;

        result
    }

    async fn run_pipeline(&self, job: &ProcessingJob) -> Result<(), JobError> {
        let (id, task) = (job.id.as_str(), job.task_id.as_str());

        self.tracker.start(id, task).await?;
        self.tracker
            .advance(id, task, milestone::STARTED, "Extracting metadata")
            .await?;

        let workspace = self.create_workspace(id)?;

        let metadata = extract_metadata(self.runner.as_ref(), &self.tools, &job.source_path).await?;
        if !metadata.duration_probed {
            self.record_degraded().await;
        }
        self.tracker
            .record_metadata(
                id,
                task,
                metadata.duration_secs,
                metadata.file_size,
                metadata.resolution,
            )
            .await?;
        self.tracker
            .advance(id, task, milestone::METADATA, "Metadata extracted")
            .await?;

        let poster = generate_poster(
            self.runner.as_ref(),
            &self.tools,
            &job.source_path,
            metadata.duration_secs,
            &job.settings.poster,
            workspace.path(),
        )
        .await
        .and_then(|path| adopt(&path, &poster_destination(&self.media_root, id)));
        let poster_path = self.keep_artifact(id, "poster", poster).await;
        self.tracker
            .advance(id, task, milestone::POSTER, "Poster attempted")
            .await?;

        let preview = match generate_preview(
            self.runner.as_ref(),
            &self.tools,
            &job.source_path,
            metadata.duration_secs,
            &job.settings.preview,
            workspace.path(),
        )
        .await
        {
            Ok(Some(path)) => adopt(&path, &preview_destination(&self.media_root, id)).map(Some),
            Ok(None) => {
                info!(job_id = %id, "No duration, preview skipped");
                Ok(None)
            }
            Err(e) => Err(e),
        };
        let preview_path = match preview {
            Ok(path) => path,
            Err(e) => self.keep_artifact(id, "preview", Err(e)).await,
        };
        self.tracker
            .advance(id, task, milestone::PREVIEW, "Preview attempted")
            .await?;

        self.tracker
            .advance(id, task, milestone::FINALIZING, "Finalizing")
            .await?;
        if let Err(e) = workspace.close() {
            warn!(job_id = %id, error = %e, "Failed to remove run workspace");
        }

        self.tracker
            .complete(
                id,
                task,
                Artifacts {
                    poster_path,
                    preview_path,
                },
            )
            .await?;
        Ok(())
    }

    /// Private working area for one run, removed when dropped
    fn create_workspace(&self, job_id: &str) -> Result<TempDir, JobError> {
        std::fs::create_dir_all(&self.temp_base_dir).map_err(JobError::Workspace)?;
        tempfile::Builder::new()
            .prefix(&format!("run-{}-", job_id))
            .tempdir_in(&self.temp_base_dir)
            .map_err(JobError::Workspace)
    }

    /// Keep a verified artifact, or log the failure as a degraded step
    async fn keep_artifact(
        &self,
        job_id: &str,
        kind: &str,
        result: Result<PathBuf, ArtifactError>,
    ) -> Option<PathBuf> {
        match result {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(job_id = %job_id, artifact = kind, error = %e, "Artifact generation failed, continuing");
                self.record_degraded().await;
                None
            }
        }
    }

    async fn record_degraded(&self) {
        update_metrics(&self.metrics, |m| m.degraded_steps += 1).await;
    }

    /// Root under which artifacts are adopted
    pub fn media_root(&self) -> &Path {
        &self.media_root
    }
}
