//! Daemon startup and main loop for vidprep
//!
//! Accepts submissions, enforces one active run per job id through the
//! tracker, and feeds runs to the executor over a bounded channel.

use crate::concurrency::{derive_plan, WorkerPlan};
use crate::config::{Config, ConfigError, ProcessingSettings, SettingsError};
use crate::job_executor::{JobError, JobExecutor, ProcessingJob};
use crate::metrics::{new_shared_metrics, update_metrics, SharedMetrics};
use crate::process::{SystemToolRunner, ToolRunner};
use crate::startup::{run_startup_checks, StartupError};
use crate::status_server::run_status_server;
use crate::tracker::{JobSnapshot, JobTracker, TrackerError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Longest accepted job id
pub const MAX_JOB_ID_LEN: usize = 128;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Persisted job state could not be loaded
    #[error("Job state error: {0}")]
    Tracker(#[from] TrackerError),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Error returned synchronously to a submitter
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Job ids name files, so only `[A-Za-z0-9_-]{1,128}` is accepted
    #[error("Invalid job id {0:?}")]
    InvalidJobId(String),

    /// Source paths are handed to ffprobe and ffmpeg as positional arguments
    #[error("Source path must be absolute: {0}")]
    InvalidSourcePath(PathBuf),

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// Includes `ConcurrentRunConflict`
    #[error("{0}")]
    Tracker(#[from] TrackerError),

    #[error("Daemon is shutting down")]
    ShuttingDown,
}

/// Check that `job_id` is usable as a file name component
pub fn validate_job_id(job_id: &str) -> Result<(), SubmitError> {
    let valid = !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SubmitError::InvalidJobId(job_id.to_string()))
    }
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived worker plan
    pub plan: WorkerPlan,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    /// Authoritative job records
    pub tracker: Arc<JobTracker>,
    /// Job executor for running pipelines
    pub executor: Arc<JobExecutor>,
    /// Job queue sender
    job_tx: mpsc::Sender<ProcessingJob>,
    /// Job queue receiver (wrapped for async access)
    job_rx: Arc<RwLock<mpsc::Receiver<ProcessingJob>>>,
}

impl Daemon {
    /// Initialize the daemon with an existing configuration
    ///
    /// This performs the full startup sequence:
    /// 1. Validate the configuration
    /// 2. Run startup checks (temp dir, ffprobe, ffmpeg, libx264)
    /// 3. Load persisted job records
    /// 4. Derive the worker plan and build the executor
    pub async fn with_config(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        let runner: Arc<dyn ToolRunner> = Arc::new(SystemToolRunner);
        run_startup_checks(runner.as_ref(), &config.tools, &config.storage.temp_dir).await?;
        Self::with_runner(config, runner)
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful when ffmpeg is known to be present or not needed yet.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        Self::with_runner(config, Arc::new(SystemToolRunner))
    }

    /// Initialize the daemon with a specific tool runner
    pub fn with_runner(config: Config, runner: Arc<dyn ToolRunner>) -> Result<Self, DaemonError> {
        let tracker = match &config.storage.state_dir {
            Some(dir) => JobTracker::load(dir.clone())?,
            None => JobTracker::in_memory(),
        };
        let tracker = Arc::new(tracker);

        let plan = derive_plan(&config);
        let metrics = new_shared_metrics(plan.pool_size);

        let executor = Arc::new(JobExecutor::new(
            plan.clone(),
            metrics.clone(),
            tracker.clone(),
            runner,
            config.tools.clone(),
            &config.storage,
        ));

        let (job_tx, job_rx) = mpsc::channel(plan.queue_capacity);

        info!(
            pool_size = plan.pool_size,
            total_cores = plan.total_cores,
            queue_capacity = plan.queue_capacity,
            "Daemon initialized"
        );

        Ok(Self {
            config,
            plan,
            metrics,
            tracker,
            executor,
            job_tx,
            job_rx: Arc::new(RwLock::new(job_rx)),
        })
    }

    /// Submit a run for `job_id`
    ///
    /// Without explicit settings the configured defaults are used. Returns the
    /// new run's task id as soon as the run is queued.
    pub async fn submit(
        &self,
        job_id: &str,
        source_path: PathBuf,
        settings: Option<ProcessingSettings>,
    ) -> Result<String, SubmitError> {
        validate_job_id(job_id)?;
        if !source_path.is_absolute() {
            return Err(SubmitError::InvalidSourcePath(source_path));
        }
        let settings = settings.unwrap_or_else(|| self.config.processing_settings());
        settings.validate()?;

        let task_id = Uuid::new_v4().to_string();
        self.tracker.enqueue(job_id, &source_path, &task_id).await?;

        let job = ProcessingJob {
            id: job_id.to_string(),
            source_path,
            task_id: task_id.clone(),
            settings,
        };

        // Counted before sending so a fast worker never decrements first.
        update_metrics(&self.metrics, |m| m.queue_len += 1).await;

        if self.job_tx.send(job).await.is_err() {
            update_metrics(&self.metrics, |m| m.queue_len = m.queue_len.saturating_sub(1)).await;
            let _ = self
                .tracker
                .fail(job_id, &task_id, "Error: daemon shutting down")
                .await;
            return Err(SubmitError::ShuttingDown);
        }

        debug!(job_id = %job_id, task_id = %task_id, "Job queued");
        Ok(task_id)
    }

    /// Current record for `job_id`
    pub async fn status(&self, job_id: &str) -> Result<JobSnapshot, TrackerError> {
        self.tracker
            .get(job_id)
            .await
            .ok_or_else(|| TrackerError::JobNotFound(job_id.to_string()))
    }

    /// All job records
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.tracker.list().await
    }

    /// Start the status HTTP server
    ///
    /// Spawns the HTTP server as a background task.
    pub fn start_status_server(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let daemon = self.clone();
        tokio::spawn(async move {
            let bind = daemon.config.server.bind.clone();
            if let Err(e) = run_status_server(daemon, &bind).await {
                error!(error = %e, "Status server error");
            }
        })
    }

    /// Run the daemon main loop
    ///
    /// Every received run is spawned at once and waits for a worker slot in
    /// the executor. Returns when the queue is closed.
    pub async fn run(&self) -> Result<(), DaemonError> {
        loop {
            let job = {
                let mut rx = self.job_rx.write().await;
                rx.recv().await
            };

            match job {
                Some(job) => {
                    let executor = self.executor.clone();
                    tokio::spawn(async move {
                        let job_id = job.id.clone();
                        match executor.execute(job).await {
                            Ok(()) | Err(JobError::Tracker(TrackerError::StaleRun { .. })) => {}
                            Err(e) => warn!(job_id = %job_id, error = %e, "Run ended with error"),
                        }
                    });
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Run the daemon with the status server
    ///
    /// A status server that stops (for instance on a bind failure) stops the daemon.
    pub async fn run_with_server(self: Arc<Self>) -> Result<(), DaemonError> {
        let server = self.start_status_server();
        tokio::select! {
            result = self.run() => result,
            joined = server => Err(DaemonError::Server(match joined {
                Ok(()) => "status server stopped".to_string(),
                Err(e) => e.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use crate::tracker::JobStatus;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dirs: TempDir,
        source: PathBuf,
        daemon: Arc<Daemon>,
    }

    fn fixture(runner: ScriptedRunner) -> Fixture {
        let dirs = TempDir::new().unwrap();
        let source = dirs.path().join("upload.mp4");
        std::fs::write(&source, b"video bytes").unwrap();

        let mut config = Config::default();
        config.storage.media_root = dirs.path().join("media");
        config.storage.temp_dir = dirs.path().join("tmp");
        config.workers.max_concurrent_jobs = 2;

        let daemon = Daemon::with_runner(config, Arc::new(runner)).unwrap();
        Fixture {
            _dirs: dirs,
            source,
            daemon: Arc::new(daemon),
        }
    }

    async fn wait_for_terminal(daemon: &Daemon, job_id: &str) -> JobSnapshot {
        for _ in 0..200 {
            let snap = daemon.status(job_id).await.unwrap();
            if snap.is_terminal() {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    #[test]
    fn test_validate_job_id() {
        let longest = "x".repeat(MAX_JOB_ID_LEN);
        let too_long = "x".repeat(MAX_JOB_ID_LEN + 1);
        for ok in ["a", "video_42", "3f2b-11ee-9c1a", longest.as_str()] {
            assert!(validate_job_id(ok).is_ok(), "{} should be valid", ok);
        }
        for bad in ["", "..", "a/b", "../etc", "with space", "é", too_long.as_str()] {
            assert!(
                matches!(validate_job_id(bad), Err(SubmitError::InvalidJobId(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_submit_queues_and_returns_task_id() {
        let f = fixture(ScriptedRunner::media("60"));

        let task_id = f.daemon.submit("job-1", f.source.clone(), None).await.unwrap();
        assert!(Uuid::parse_str(&task_id).is_ok());

        let snap = f.daemon.status("job-1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Pending);
        assert!(snap.queued);
        assert_eq!(snap.task_id.as_deref(), Some(task_id.as_str()));
        assert_eq!(f.daemon.metrics.read().await.queue_len, 1);
    }

    #[tokio::test]
    async fn test_duplicate_submission_conflicts() {
        let f = fixture(ScriptedRunner::media("60"));
        let first = f.daemon.submit("job-1", f.source.clone(), None).await.unwrap();

        let err = f
            .daemon
            .submit("job-1", f.source.clone(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Tracker(TrackerError::ConcurrentRunConflict(_))
        ));

        let snap = f.daemon.status("job-1").await.unwrap();
        assert_eq!(snap.task_id.as_deref(), Some(first.as_str()));
        assert_eq!(f.daemon.metrics.read().await.queue_len, 1);
    }

    #[tokio::test]
    async fn test_invalid_submissions_leave_no_record() {
        let f = fixture(ScriptedRunner::media("60"));

        let err = f
            .daemon
            .submit("../escape", f.source.clone(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidJobId(_)));

        for relative in ["-version", "uploads/clip.mp4", "../clip.mp4"] {
            let err = f
                .daemon
                .submit("job-1", PathBuf::from(relative), None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, SubmitError::InvalidSourcePath(ref p) if p == Path::new(relative)),
                "{} should be rejected",
                relative
            );
        }

        let mut settings = ProcessingSettings::default();
        settings.preview.segment_duration = 0;
        let err = f
            .daemon
            .submit("job-1", f.source.clone(), Some(settings))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidSettings(_)));

        assert!(f.daemon.jobs().await.is_empty());
        assert!(matches!(
            f.daemon.status("job-1").await,
            Err(TrackerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run_loop_processes_submissions() {
        let f = fixture(ScriptedRunner::media("120.5"));
        let daemon = f.daemon.clone();
        let loop_handle = tokio::spawn(async move { daemon.run().await });

        f.daemon.submit("job-a", f.source.clone(), None).await.unwrap();
        f.daemon.submit("job-b", f.source.clone(), None).await.unwrap();

        for id in ["job-a", "job-b"] {
            let snap = wait_for_terminal(&f.daemon, id).await;
            assert_eq!(snap.status, JobStatus::Completed);
            assert_eq!(snap.progress, 100);
            assert_eq!(snap.duration, 120);
            assert!(snap.poster_path.is_some());
            assert!(snap.preview_path.is_some());
        }

        // A finished job can be run again as a fresh run
        let second = f.daemon.submit("job-a", f.source.clone(), None).await.unwrap();
        let snap = wait_for_terminal(&f.daemon, "job-a").await;
        assert_eq!(snap.task_id.as_deref(), Some(second.as_str()));
        assert_eq!(snap.status, JobStatus::Completed);

        // Counters are updated just after the terminal state is recorded
        let mut metrics = f.daemon.metrics.read().await.clone();
        for _ in 0..200 {
            if metrics.completed_jobs == 3 && metrics.running_jobs == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            metrics = f.daemon.metrics.read().await.clone();
        }
        assert_eq!(metrics.completed_jobs, 3);
        assert_eq!(metrics.running_jobs, 0);
        assert_eq!(metrics.queue_len, 0);
        assert_eq!(metrics.pool_size, 2);

        loop_handle.abort();
    }

    #[tokio::test]
    async fn test_missing_source_reported_as_failed() {
        let f = fixture(ScriptedRunner::media("10"));
        let daemon = f.daemon.clone();
        let loop_handle = tokio::spawn(async move { daemon.run().await });

        f.daemon
            .submit("job-x", f.source.with_file_name("missing.mp4"), None)
            .await
            .unwrap();

        let snap = wait_for_terminal(&f.daemon, "job-x").await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.message.starts_with("Error:"));

        loop_handle.abort();
    }
}
