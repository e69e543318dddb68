//! Metadata extraction for source videos.
//!
//! The file size comes straight from the filesystem; the container duration
//! and the first video stream's resolution come from ffprobe. A missing
//! source is an error, a bad probe is not.

use crate::config::ToolsConfig;
use crate::process::{ToolCommand, ToolRunner};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for metadata extraction.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The source file is missing, unreadable, or not a regular file.
    #[error("Source unreadable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Technical metadata of a source video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MediaMetadata {
    /// Whole seconds; 0 when the probe could not determine it.
    pub duration_secs: u64,
    /// Size in bytes.
    pub file_size: u64,
    /// False when the duration is a fallback value.
    pub duration_probed: bool,
    /// `WIDTHxHEIGHT` of the first video stream, if there is one.
    pub resolution: Option<String>,
}

/// Build the ffprobe invocation that prints only the container duration.
///
/// `ffprobe -v quiet -show_entries format=duration -of csv=p=0 <source>`
pub fn build_probe_command(ffprobe: &str, source: &Path, timeout: Duration) -> ToolCommand {
    ToolCommand::new(ffprobe, timeout)
        .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
        .arg(source.to_string_lossy())
}

/// Build the ffprobe invocation that prints the first video stream's size.
///
/// `ffprobe -v error -select_streams v:0 -show_entries stream=width,height -of csv=s=x:p=0 <source>`
pub fn build_resolution_command(ffprobe: &str, source: &Path, timeout: Duration) -> ToolCommand {
    ToolCommand::new(ffprobe, timeout)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(source.to_string_lossy())
}

/// Parse `1920x1080` style output. Anything else yields `None`.
pub fn parse_resolution(stdout: &str) -> Option<String> {
    let line = stdout.lines().next()?.trim().trim_end_matches('x');
    let (width, height) = line.split_once('x')?;
    let dimension = |part: &str| -> Option<u32> {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok().filter(|&v| v > 0)
    };
    Some(format!("{}x{}", dimension(width)?, dimension(height)?))
}

/// Parse ffprobe's duration output into whole seconds.
///
/// The fractional part is truncated. Empty, non-numeric, negative and
/// non-finite values yield `None`.
pub fn parse_duration(stdout: &str) -> Option<u64> {
    let value: f64 = stdout.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.trunc() as u64)
}

/// Read the size of `source` and probe its duration.
pub async fn extract_metadata(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
    source: &Path,
) -> Result<MediaMetadata, MetadataError> {
    let unreadable = |source_err: io::Error| MetadataError::SourceUnreadable {
        path: source.to_path_buf(),
        source: source_err,
    };

    let meta = tokio::fs::metadata(source).await.map_err(unreadable)?;
    if !meta.is_file() {
        return Err(unreadable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    let file_size = meta.len();

    let timeout = Duration::from_secs(tools.probe_timeout_secs);
    let command = build_probe_command(&tools.ffprobe_path, source, timeout);

    let duration = match runner.run(&command).await.into_stdout() {
        Ok(stdout) => {
            let parsed = parse_duration(&stdout);
            if parsed.is_none() {
                warn!(source = %source.display(), output = %stdout.trim(), "Unparseable duration, using 0");
            }
            parsed
        }
        Err(e) => {
            warn!(source = %source.display(), error = %e, "Duration probe failed, using 0");
            None
        }
    };

    // Audio-only sources have no video stream, so a missing size is not a fault.
    let command = build_resolution_command(&tools.ffprobe_path, source, timeout);
    let resolution = match runner.run(&command).await.into_stdout() {
        Ok(stdout) => parse_resolution(&stdout),
        Err(e) => {
            debug!(source = %source.display(), error = %e, "Resolution probe failed");
            None
        }
    };

    debug!(source = %source.display(), ?duration, file_size, ?resolution, "Extracted metadata");

    Ok(MediaMetadata {
        duration_secs: duration.unwrap_or(0),
        file_size,
        duration_probed: duration.is_some(),
        resolution,
    })
}
