//! Job state tracker.
//!
//! Owns the authoritative record of every job. Each operation takes the write
//! lock exactly once, so pollers never see a half-applied update. When a state
//! directory is configured, records are also written to `{state_dir}/{id}.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock, RwLockWriteGuard};
use tracing::{info, warn};

/// Message given to runs that were in flight when the previous process exited.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted: daemon restarted during processing";

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, waiting for a worker slot.
    Pending,
    /// The pipeline is executing.
    Running,
    /// The run reached the end of the pipeline.
    Completed,
    /// The run failed; `message` holds the reason.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Error type for tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The job already has a queued or running run.
    #[error("Job {0} already has an active run")]
    ConcurrentRunConflict(String),

    /// No record exists for the job.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The caller's task id does not own the record any more.
    #[error("Run {task_id} is no longer current for job {job_id}")]
    StaleRun { job_id: String, task_id: String },

    /// The operation is not valid from the job's current status.
    #[error("Cannot {action} job {job_id} while {status}")]
    InvalidTransition {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },

    /// Progress may not go backwards within a run.
    #[error("Progress for job {job_id} cannot go from {current} to {requested}")]
    ProgressRegression {
        job_id: String,
        current: u8,
        requested: u8,
    },

    /// Reading persisted state failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] io::Error),
}

/// Verified artifact locations for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub poster_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
}

/// A job's record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Job identifier and single-flight key.
    pub id: String,
    /// Source video, read-only to the pipeline.
    pub source_path: PathBuf,
    pub status: JobStatus,
    /// True while the job waits for a worker slot.
    #[serde(default)]
    pub queued: bool,
    /// 0..=100, non-decreasing within one run.
    pub progress: u8,
    /// Current step, or the failure reason.
    pub message: String,
    /// Identifier of the current run.
    pub task_id: Option<String>,
    /// Whole seconds, 0 until extracted.
    pub duration: u64,
    /// Bytes, 0 until extracted.
    pub file_size: u64,
    /// `WIDTHxHEIGHT` of the first video stream, when known.
    #[serde(default)]
    pub resolution: Option<String>,
    pub poster_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last update timestamp (Unix epoch milliseconds).
    pub updated_at: i64,
}

/// What status queries return.
pub type JobSnapshot = JobRecord;

impl JobRecord {
    fn new(id: &str, source_path: &Path) -> Self {
        let now = current_timestamp_ms();
        Self {
            id: id.to_string(),
            source_path: source_path.to_path_buf(),
            status: JobStatus::Pending,
            queued: false,
            progress: 0,
            message: String::new(),
            task_id: None,
            duration: 0,
            file_size: 0,
            resolution: None,
            poster_path: None,
            preview_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the `updated_at` timestamp.
    fn touch(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Queued or running; a second run is refused.
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Running || (self.status == JobStatus::Pending && self.queued)
    }

    fn check_task(&self, task_id: &str) -> Result<(), TrackerError> {
        if self.task_id.as_deref() == Some(task_id) {
            Ok(())
        } else {
            Err(TrackerError::StaleRun {
                job_id: self.id.clone(),
                task_id: task_id.to_string(),
            })
        }
    }

    fn require(&self, status: JobStatus, action: &'static str) -> Result<(), TrackerError> {
        if self.status == status {
            Ok(())
        } else {
            Err(TrackerError::InvalidTransition {
                job_id: self.id.clone(),
                status: self.status,
                action,
            })
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Buffered updates per subscriber before it starts lagging
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Shared owner of all job records.
#[derive(Debug)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, JobRecord>>,
    state_dir: Option<PathBuf>,
    updates: broadcast::Sender<JobSnapshot>,
    /// Bumped under the map lock, so it orders updates.
    sequence: AtomicU64,
    /// Sequence of the newest record written per job.
    persisted: Mutex<HashMap<String, u64>>,
}

impl JobTracker {
    fn with_records(jobs: HashMap<String, JobRecord>, state_dir: Option<PathBuf>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(jobs),
            state_dir,
            updates,
            sequence: AtomicU64::new(0),
            persisted: Mutex::new(HashMap::new()),
        }
    }

    /// Tracker that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self::with_records(HashMap::new(), None)
    }

    /// Every accepted update, in the order it was applied.
    pub fn subscribe(&self) -> broadcast::Receiver<JobSnapshot> {
        self.updates.subscribe()
    }

    /// Tracker persisting to `state_dir`, seeded with the records found there.
    ///
    /// Records left queued or running by a previous process are marked failed.
    pub fn load(state_dir: PathBuf) -> Result<Self, TrackerError> {
        let mut jobs = HashMap::new();

        for mut record in load_records(&state_dir)? {
            if record.is_active() {
                warn!(job_id = %record.id, "Marking interrupted run as failed");
                record.status = JobStatus::Failed;
                record.queued = false;
                record.message = INTERRUPTED_MESSAGE.to_string();
                record.touch();
                save_record(&record, &state_dir)?;
            }
            jobs.insert(record.id.clone(), record);
        }

        info!(state_dir = %state_dir.display(), jobs = jobs.len(), "Loaded job records");

        Ok(Self::with_records(jobs, Some(state_dir)))
    }

    /// Register a new run for `job_id`.
    ///
    /// Creates the record if needed. An existing inactive record is reset for
    /// a fresh run: progress, metadata and artifact references are cleared.
    pub async fn enqueue(
        &self,
        job_id: &str,
        source_path: &Path,
        task_id: &str,
    ) -> Result<JobSnapshot, TrackerError> {
        let mut jobs = self.jobs.write().await;

        let created_at = match jobs.get(job_id) {
            Some(existing) if existing.is_active() => {
                return Err(TrackerError::ConcurrentRunConflict(job_id.to_string()));
            }
            Some(existing) => Some(existing.created_at),
            None => None,
        };

        let mut record = JobRecord::new(job_id, source_path);
        if let Some(created_at) = created_at {
            record.created_at = created_at;
        }
        record.queued = true;
        record.task_id = Some(task_id.to_string());
        record.message = "Queued".to_string();

        jobs.insert(job_id.to_string(), record.clone());
        self.commit(jobs, &record).await;
        Ok(record)
    }

    /// A worker picked the run up: `Pending` to `Running`.
    pub async fn start(&self, job_id: &str, task_id: &str) -> Result<(), TrackerError> {
        self.update(job_id, task_id, |record| {
            record.require(JobStatus::Pending, "start")?;
            record.status = JobStatus::Running;
            record.queued = false;
            record.progress = 0;
            record.message = "Starting".to_string();
            Ok(())
        })
        .await
    }

    /// Report a progress milestone; only while running and never backwards.
    pub async fn advance(
        &self,
        job_id: &str,
        task_id: &str,
        progress: u8,
        message: &str,
    ) -> Result<(), TrackerError> {
        let progress = progress.min(100);
        self.update(job_id, task_id, |record| {
            record.require(JobStatus::Running, "advance")?;
            if progress < record.progress {
                return Err(TrackerError::ProgressRegression {
                    job_id: record.id.clone(),
                    current: record.progress,
                    requested: progress,
                });
            }
            record.progress = progress;
            record.message = message.to_string();
            Ok(())
        })
        .await
    }

    /// Store extracted metadata.
    pub async fn record_metadata(
        &self,
        job_id: &str,
        task_id: &str,
        duration: u64,
        file_size: u64,
        resolution: Option<String>,
    ) -> Result<(), TrackerError> {
        self.update(job_id, task_id, |record| {
            record.require(JobStatus::Running, "record metadata for")?;
            record.duration = duration;
            record.file_size = file_size;
            record.resolution = resolution;
            Ok(())
        })
        .await
    }

    /// `Running` to `Completed` with the verified artifacts.
    pub async fn complete(
        &self,
        job_id: &str,
        task_id: &str,
        artifacts: Artifacts,
    ) -> Result<(), TrackerError> {
        self.update(job_id, task_id, |record| {
            record.require(JobStatus::Running, "complete")?;
            record.status = JobStatus::Completed;
            record.progress = 100;
            record.message = "Completed".to_string();
            record.poster_path = artifacts.poster_path;
            record.preview_path = artifacts.preview_path;
            Ok(())
        })
        .await
    }

    /// Mark the run failed from any status.
    pub async fn fail(&self, job_id: &str, task_id: &str, reason: &str) -> Result<(), TrackerError> {
        self.update(job_id, task_id, |record| {
            record.status = JobStatus::Failed;
            record.queued = false;
            record.message = reason.to_string();
            Ok(())
        })
        .await
    }

    /// Current record for `job_id`.
    pub async fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = self.jobs.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    async fn update<F>(&self, job_id: &str, task_id: &str, apply: F) -> Result<(), TrackerError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), TrackerError>,
    {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::JobNotFound(job_id.to_string()))?;
        record.check_task(task_id)?;

        // Apply to a copy so a rejected update leaves the record untouched.
        let mut next = record.clone();
        apply(&mut next)?;
        next.touch();

        *record = next.clone();
        self.commit(jobs, &next).await;
        Ok(())
    }

    /// Broadcast an applied update, then persist it once the map lock is
    /// released so pollers never wait on disk I/O.
    async fn commit(&self, jobs: RwLockWriteGuard<'_, HashMap<String, JobRecord>>, record: &JobRecord) {
        // No subscribers is fine.
        let _ = self.updates.send(record.clone());

        let Some(dir) = &self.state_dir else {
            return;
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        drop(jobs);

        let mut persisted = self.persisted.lock().await;
        if persisted.get(&record.id).is_some_and(|&last| last > sequence) {
            return;
        }
        match write_record(record, dir).await {
            Ok(()) => {
                persisted.insert(record.id.clone(), sequence);
            }
            Err(e) => warn!(job_id = %record.id, error = %e, "Failed to persist job record"),
        }
    }
}

fn record_file(state_dir: &Path, job_id: &str) -> PathBuf {
    state_dir.join(format!("{}.json", job_id))
}

fn record_json(record: &JobRecord) -> Result<String, io::Error> {
    serde_json::to_string_pretty(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn write_record(record: &JobRecord, state_dir: &Path) -> Result<(), io::Error> {
    let json = record_json(record)?;
    tokio::fs::create_dir_all(state_dir).await?;
    tokio::fs::write(record_file(state_dir, &record.id), json).await
}

/// Write a record to `{state_dir}/{id}.json`.
pub fn save_record(record: &JobRecord, state_dir: &Path) -> Result<(), io::Error> {
    fs::create_dir_all(state_dir)?;
    fs::write(record_file(state_dir, &record.id), record_json(record)?)
}

/// Load every `.json` record in `state_dir`; unreadable files are skipped.
pub fn load_records(state_dir: &Path) -> Result<Vec<JobRecord>, io::Error> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();

    for entry in fs::read_dir(state_dir)? {
        let path = entry?.path();

        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        match load_record_from_file(&path) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
            }
        }
    }

    Ok(records)
}

fn load_record_from_file(path: &Path) -> Result<JobRecord, io::Error> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
