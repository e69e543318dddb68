//! Artifact generation for vidprep
//!
//! Encoders write into the run's private workspace. A file only leaves the
//! workspace after [`verify_output`] has seen it non-empty, and [`adopt`]
//! moves it into the media root in one rename.

pub mod filters;
pub mod poster;
pub mod preview;

pub use filters::{plan_preview, poster_timestamp, scale_pad_filter, PreviewPlan};
pub use poster::{build_poster_command, generate_poster};
pub use preview::{build_preview_command, generate_preview};

use crate::process::ToolError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Error type for a poster or preview step
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The encoder did not run to success
    #[error("Encoder failed: {0}")]
    Tool(#[from] ToolError),

    /// The encoder reported success but left nothing usable behind
    #[error("Output missing or empty: {0}")]
    EmptyOutput(PathBuf),

    /// Moving the output into place failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Final location of a job's poster: `{media_root}/posters/{job_id}.jpg`
pub fn poster_destination(media_root: &Path, job_id: &str) -> PathBuf {
    media_root.join("posters").join(format!("{}.jpg", job_id))
}

/// Final location of a job's preview: `{media_root}/previews/{job_id}.mp4`
pub fn preview_destination(media_root: &Path, job_id: &str) -> PathBuf {
    media_root.join("previews").join(format!("{}.mp4", job_id))
}

/// Check that `path` is a regular file with at least one byte.
///
/// Returns the file size.
pub fn verify_output(path: &Path) -> Result<u64, ArtifactError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        _ => Err(ArtifactError::EmptyOutput(path.to_path_buf())),
    }
}

/// Move a verified output to `dest`, creating parent directories.
///
/// Tries a rename first. Across filesystems the file is copied into place
/// instead; once `dest` holds the artifact, a source that cannot be removed
/// is left for the run workspace cleanup.
pub fn adopt(src: &Path, dest: &Path) -> Result<PathBuf, ArtifactError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if fs::rename(src, dest).is_err() {
        copy_into_place(src, dest)?;
        if let Err(e) = fs::remove_file(src) {
            debug!(src = %src.display(), error = %e, "Adopted copy left its source behind");
        }
    }

    Ok(dest.to_path_buf())
}

/// Copy `src` next to `dest` and rename it over `dest`, so `dest` never
/// holds a partial file.
fn copy_into_place(src: &Path, dest: &Path) -> io::Result<()> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    if let Err(e) = fs::copy(src, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, dest)
}
