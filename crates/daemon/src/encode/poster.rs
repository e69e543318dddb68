//! Poster frame extraction

use super::filters::{poster_timestamp, scale_pad_filter};
use super::{verify_output, ArtifactError};
use crate::config::{PosterSettings, ToolsConfig};
use crate::process::{ToolCommand, ToolRunner};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name of the poster inside the run workspace
pub const POSTER_FILE_NAME: &str = "poster.jpg";

/// Build the ffmpeg command that writes one scaled and padded frame.
///
/// `ffmpeg -i <source> -ss <t> -vframes 1 -vf <scale/pad> -q:v <quality> -y <output>`
pub fn build_poster_command(
    ffmpeg: &str,
    source: &Path,
    output: &Path,
    timestamp_secs: u64,
    settings: &PosterSettings,
    timeout: Duration,
) -> ToolCommand {
    ToolCommand::new(ffmpeg, timeout)
        .arg("-i")
        .arg(source.to_string_lossy())
        .arg("-ss")
        .arg(timestamp_secs.to_string())
        .args(["-vframes", "1"])
        .arg("-vf")
        .arg(scale_pad_filter(settings.width, settings.height))
        .arg("-q:v")
        .arg(settings.quality.to_string())
        .arg("-y")
        .arg(output.to_string_lossy())
}

/// Extract the poster frame into `workdir` and verify it.
///
/// Returns the path of the verified file inside `workdir`.
pub async fn generate_poster(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
    source: &Path,
    duration_secs: u64,
    settings: &PosterSettings,
    workdir: &Path,
) -> Result<PathBuf, ArtifactError> {
    let output = workdir.join(POSTER_FILE_NAME);
    let timestamp = poster_timestamp(duration_secs);
    let command = build_poster_command(
        &tools.ffmpeg_path,
        source,
        &output,
        timestamp,
        settings,
        Duration::from_secs(tools.poster_timeout_secs),
    );

    runner.run(&command).await.into_stdout()?;
    let size = verify_output(&output)?;

    debug!(output = %output.display(), timestamp, size, "Poster generated");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ToolError, ToolOutcome};
    use crate::testing::{success, write_output, ScriptedRunner};
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // The command always carries the timestamp, one frame, the filter and quality
        #[test]
        fn prop_poster_command_completeness(
            width in 1u32..4096,
            height in 1u32..4096,
            quality in 1u32..=31,
            timestamp in 5u64..100_000,
        ) {
            let settings = PosterSettings { width, height, quality };
            let cmd = build_poster_command(
                "ffmpeg",
                Path::new("/src/in.mov"),
                Path::new("/work/poster.jpg"),
                timestamp,
                &settings,
                Duration::from_secs(60),
            );

            prop_assert!(cmd.has_flag_with_value("-i", "/src/in.mov"));
            prop_assert!(cmd.has_flag_with_value("-ss", &timestamp.to_string()));
            prop_assert!(cmd.has_flag_with_value("-vframes", "1"));
            prop_assert!(cmd.has_flag_with_value("-vf", &scale_pad_filter(width, height)));
            prop_assert!(cmd.has_flag_with_value("-q:v", &quality.to_string()));
            prop_assert!(cmd.args.contains(&"-y".to_string()));
            prop_assert_eq!(cmd.args.last().map(String::as_str), Some("/work/poster.jpg"));
        }
    }

    #[tokio::test]
    async fn test_poster_taken_at_half_duration() {
        let work = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|cmd| {
            write_output(cmd, b"jpeg");
            success("")
        });

        let path = generate_poster(
            &runner,
            &ToolsConfig::default(),
            Path::new("/src/in.mp4"),
            120,
            &PosterSettings::default(),
            work.path(),
        )
        .await
        .unwrap();

        assert_eq!(path, work.path().join(POSTER_FILE_NAME));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].flag_value("-ss"), Some("60"));
        assert_eq!(calls[0].timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_unknown_duration_uses_five_seconds() {
        let work = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|cmd| {
            write_output(cmd, b"jpeg");
            success("")
        });

        generate_poster(
            &runner,
            &ToolsConfig::default(),
            Path::new("/src/in.mp4"),
            0,
            &PosterSettings::default(),
            work.path(),
        )
        .await
        .unwrap();

        assert_eq!(runner.calls()[0].flag_value("-ss"), Some("5"));
    }

    #[tokio::test]
    async fn test_success_without_output_is_empty_output() {
        let work = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|_| success(""));

        let err = generate_poster(
            &runner,
            &ToolsConfig::default(),
            Path::new("/src/in.mp4"),
            30,
            &PosterSettings::default(),
            work.path(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ArtifactError::EmptyOutput(_)));
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported() {
        let work = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(|_| ToolOutcome::TimedOut);

        let err = generate_poster(
            &runner,
            &ToolsConfig::default(),
            Path::new("/src/in.mp4"),
            30,
            &PosterSettings::default(),
            work.path(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ArtifactError::Tool(ToolError::TimedOut)));
    }
}
