//! Startup checks module for vidprep
//!
//! Verifies before serving that:
//! - the temporary directory for run workspaces is writable
//! - ffprobe runs
//! - ffmpeg runs and reports a version
//! - ffmpeg was built with the libx264 encoder used for previews

use crate::config::ToolsConfig;
use crate::process::{ToolCommand, ToolOutcome, ToolRunner};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Encoder the preview step depends on
pub const PREVIEW_ENCODER: &str = "libx264";

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),

    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg encoder {0} not available")]
    EncoderMissing(String),

    #[error("Temporary directory {path} is not writable: {source}")]
    TempDirUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe(outcome: &ToolOutcome, program: &str) -> String {
    match outcome {
        ToolOutcome::Success { .. } => "ok".to_string(),
        ToolOutcome::ToolNotFound => format!("{} not found; is it installed and in PATH?", program),
        ToolOutcome::TimedOut => format!("{} did not answer in time", program),
        ToolOutcome::Failed { exit_code, stderr } => format!(
            "{} exited with {:?}: {}",
            program,
            exit_code,
            stderr.lines().next().unwrap_or("")
        ),
    }
}

/// Parse the version token from `ffmpeg -version` output
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<String> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version = version_part.trim_start_matches('n');
    if version.is_empty() {
        return None;
    }
    Some(version.to_string())
}

/// Check whether `ffmpeg -encoders` output lists `encoder`
///
/// Encoder lines look like ` V....D libx264   libx264 H.264 / AVC ...`.
pub fn has_encoder(encoders_output: &str, encoder: &str) -> bool {
    encoders_output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(encoder))
}

/// Check that run workspaces can be created under `temp_dir`
///
/// Creates the directory if needed, then creates and removes a probe file in it.
pub fn check_temp_dir_writable(temp_dir: &Path) -> Result<(), StartupError> {
    let unwritable = |source: io::Error| StartupError::TempDirUnwritable {
        path: temp_dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(temp_dir).map_err(unwritable)?;
    tempfile::Builder::new()
        .prefix(".vidprep-check-")
        .tempfile_in(temp_dir)
        .map_err(unwritable)?;
    Ok(())
}

/// Check that `ffprobe -version` succeeds
pub async fn check_ffprobe_available(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
) -> Result<(), StartupError> {
    let cmd = ToolCommand::new(&tools.ffprobe_path, Duration::from_secs(tools.probe_timeout_secs))
        .arg("-version");
    let outcome = runner.run(&cmd).await;
    if !outcome.is_success() {
        return Err(StartupError::FfprobeUnavailable(describe(&outcome, &tools.ffprobe_path)));
    }
    Ok(())
}

/// Check that `ffmpeg -version` succeeds and return the reported version
pub async fn check_ffmpeg_available(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
) -> Result<String, StartupError> {
    let cmd = ToolCommand::new(&tools.ffmpeg_path, Duration::from_secs(tools.probe_timeout_secs))
        .arg("-version");
    let outcome = runner.run(&cmd).await;
    let description = describe(&outcome, &tools.ffmpeg_path);
    let stdout = outcome
        .into_stdout()
        .map_err(|_| StartupError::FfmpegUnavailable(description))?;

    parse_ffmpeg_version(&stdout).ok_or_else(|| {
        StartupError::FfmpegUnavailable(format!(
            "Could not parse FFmpeg version from output: {}",
            stdout.lines().next().unwrap_or("(empty)")
        ))
    })
}

/// Check that ffmpeg lists the preview encoder
pub async fn check_preview_encoder(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
) -> Result<(), StartupError> {
    let cmd = ToolCommand::new(&tools.ffmpeg_path, Duration::from_secs(tools.probe_timeout_secs))
        .args(["-hide_banner", "-encoders"]);
    match runner.run(&cmd).await.into_stdout() {
        Ok(stdout) if has_encoder(&stdout, PREVIEW_ENCODER) => Ok(()),
        _ => Err(StartupError::EncoderMissing(PREVIEW_ENCODER.to_string())),
    }
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. temporary directory is writable
/// 2. ffprobe availability
/// 3. ffmpeg availability and version
/// 4. libx264 encoder
pub async fn run_startup_checks(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
    temp_dir: &Path,
) -> Result<(), StartupError> {
    check_temp_dir_writable(temp_dir)?;
    check_ffprobe_available(runner, tools).await?;
    let version = check_ffmpeg_available(runner, tools).await?;
    check_preview_encoder(runner, tools).await?;
    info!(ffmpeg_version = %version, encoder = PREVIEW_ENCODER, "Startup checks passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failed, success, ScriptedRunner};
    use proptest::prelude::*;
    use tempfile::TempDir;

    const ENCODERS: &str = "Encoders:\n V..... = Video\n ------\n V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)\n V....D mjpeg                MJPEG (Motion JPEG)\n";

    fn healthy_runner() -> ScriptedRunner {
        ScriptedRunner::new(|cmd| {
            if cmd.args.contains(&"-encoders".to_string()) {
                success(ENCODERS)
            } else if cmd.program == "ffmpeg" {
                success("ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers\n")
            } else {
                success("ffprobe version 6.1.1\n")
            }
        })
    }

    // Version strings with or without the n prefix parse to the same token
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing(
            major in 4u32..20,
            minor in 0u32..10,
            n_prefix in proptest::bool::ANY,
        ) {
            let prefix = if n_prefix { "n" } else { "" };
            let output = format!(
                "ffmpeg version {}{}.{}-static https://johnvansickle.com/ffmpeg/\nbuilt with gcc 8\n",
                prefix, major, minor
            );
            prop_assert_eq!(
                parse_ffmpeg_version(&output),
                Some(format!("{}.{}-static", major, minor))
            );
        }
    }

    #[test]
    fn test_parse_version_rejects_unrelated_output() {
        assert_eq!(parse_ffmpeg_version(""), None);
        assert_eq!(parse_ffmpeg_version("avconv version 12"), None);
    }

    #[test]
    fn test_has_encoder() {
        assert!(has_encoder(ENCODERS, "libx264"));
        assert!(has_encoder(ENCODERS, "mjpeg"));
        assert!(!has_encoder(ENCODERS, "libx265"));
        // Description text is not an encoder name
        assert!(!has_encoder(ENCODERS, "H.264"));
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let temp = TempDir::new().unwrap();
        let runner = healthy_runner();
        run_startup_checks(&runner, &ToolsConfig::default(), temp.path())
            .await
            .unwrap();
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_temp_dir_is_created_and_left_clean() {
        let temp = TempDir::new().unwrap();
        let runs = temp.path().join("vidprep").join("runs");

        check_temp_dir_writable(&runs).unwrap();

        assert!(runs.is_dir());
        assert_eq!(fs::read_dir(&runs).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unusable_temp_dir_stops_startup_before_tools() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let runner = healthy_runner();

        let err = run_startup_checks(&runner, &ToolsConfig::default(), &blocker.join("runs"))
            .await
            .unwrap_err();

        assert!(matches!(err, StartupError::TempDirUnwritable { ref path, .. } if path.ends_with("runs")));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_ffprobe_stops_startup() {
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.program == "ffprobe" {
                ToolOutcome::ToolNotFound
            } else {
                success("ffmpeg version 6.0")
            }
        });
        let err = run_startup_checks(&runner, &ToolsConfig::default(), TempDir::new().unwrap().path())
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::FfprobeUnavailable(_)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_broken_ffmpeg_stops_startup() {
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.program == "ffmpeg" {
                failed("error while loading shared libraries")
            } else {
                success("ffprobe version 6.0")
            }
        });
        let err = run_startup_checks(&runner, &ToolsConfig::default(), TempDir::new().unwrap().path())
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::FfmpegUnavailable(_)));
    }

    #[tokio::test]
    async fn test_ffmpeg_without_libx264_stops_startup() {
        let runner = ScriptedRunner::new(|cmd| {
            if cmd.args.contains(&"-encoders".to_string()) {
                success(" V....D mjpeg                MJPEG (Motion JPEG)\n")
            } else if cmd.program == "ffmpeg" {
                success("ffmpeg version n7.0\n")
            } else {
                success("ffprobe version 7.0")
            }
        });
        let err = run_startup_checks(&runner, &ToolsConfig::default(), TempDir::new().unwrap().path())
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::EncoderMissing(name) if name == "libx264"));
    }
}
