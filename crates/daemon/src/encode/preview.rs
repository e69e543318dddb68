//! Preview clip synthesis
//!
//! Long sources are sampled into evenly spaced segments which are
//! concatenated and scaled once; short sources are scaled whole.

use super::filters::{plan_preview, sampled_filter_graph, scale_pad_filter, PreviewPlan};
use super::{verify_output, ArtifactError};
use crate::config::{PreviewSettings, ToolsConfig};
use crate::process::{ToolCommand, ToolRunner};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name of the preview inside the run workspace
pub const PREVIEW_FILE_NAME: &str = "preview.mp4";

/// Build the ffmpeg command for `plan`, or `None` when the plan is [`PreviewPlan::Skip`].
///
/// Whole source: `ffmpeg -i <src> -vf <scale/pad> -c:v libx264 -preset P -crf C -an -y <out>`
///
/// Sampled: `ffmpeg -i <src> -filter_complex <graph> -map [final] -c:v libx264 -preset P -crf C -an -y <out>`
pub fn build_preview_command(
    ffmpeg: &str,
    source: &Path,
    output: &Path,
    plan: &PreviewPlan,
    settings: &PreviewSettings,
    timeout: Duration,
) -> Option<ToolCommand> {
    let cmd = ToolCommand::new(ffmpeg, timeout)
        .arg("-i")
        .arg(source.to_string_lossy());

    let cmd = match plan {
        PreviewPlan::Skip => return None,
        PreviewPlan::WholeSource => cmd
            .arg("-vf")
            .arg(scale_pad_filter(settings.width, settings.height)),
        PreviewPlan::Sampled {
            starts,
            segment_duration,
        } => cmd
            .arg("-filter_complex")
            .arg(sampled_filter_graph(
                starts,
                *segment_duration,
                settings.width,
                settings.height,
            ))
            .args(["-map", "[final]"]),
    };

    Some(
        cmd.args(["-c:v", "libx264"])
            .arg("-preset")
            .arg(settings.preset.as_str())
            .arg("-crf")
            .arg(settings.crf.to_string())
            .arg("-an")
            .arg("-y")
            .arg(output.to_string_lossy()),
    )
}

/// Encode the preview into `workdir` and verify it.
///
/// Returns `Ok(None)` when there is nothing to sample (unknown duration).
pub async fn generate_preview(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
    source: &Path,
    duration_secs: u64,
    settings: &PreviewSettings,
    workdir: &Path,
) -> Result<Option<PathBuf>, ArtifactError> {
    let output = workdir.join(PREVIEW_FILE_NAME);
    let plan = plan_preview(duration_secs, settings);

    let command = match build_preview_command(
        &tools.ffmpeg_path,
        source,
        &output,
        &plan,
        settings,
        Duration::from_secs(tools.preview_timeout_secs),
    ) {
        Some(command) => command,
        None => return Ok(None),
    };

    runner.run(&command).await.into_stdout()?;
    let size = verify_output(&output)?;

    debug!(output = %output.display(), ?plan, size, "Preview generated");
    Ok(Some(output))
}
