//! Processing settings for a single run
//!
//! A `ProcessingSettings` value is immutable for the duration of a run and is
//! passed explicitly into the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when a settings record fails validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsError {
    /// Dotted name of the offending field (e.g. `preview.crf`)
    pub field: &'static str,
    /// Human-readable reason
    pub reason: String,
}

impl SettingsError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for SettingsError {}

/// x264 speed preset used for the preview encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl PreviewPreset {
    /// Every preset, fastest first
    pub const ALL: [PreviewPreset; 9] = [
        PreviewPreset::Ultrafast,
        PreviewPreset::Superfast,
        PreviewPreset::Veryfast,
        PreviewPreset::Faster,
        PreviewPreset::Fast,
        PreviewPreset::Medium,
        PreviewPreset::Slow,
        PreviewPreset::Slower,
        PreviewPreset::Veryslow,
    ];

    /// Name as understood by ffmpeg's `-preset`
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewPreset::Ultrafast => "ultrafast",
            PreviewPreset::Superfast => "superfast",
            PreviewPreset::Veryfast => "veryfast",
            PreviewPreset::Faster => "faster",
            PreviewPreset::Fast => "fast",
            PreviewPreset::Medium => "medium",
            PreviewPreset::Slow => "slow",
            PreviewPreset::Slower => "slower",
            PreviewPreset::Veryslow => "veryslow",
        }
    }
}

impl Default for PreviewPreset {
    fn default() -> Self {
        Self::Fast
    }
}

impl fmt::Display for PreviewPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poster (still image) settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PosterSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// ffmpeg `-q:v` value, 1 (best) to 31 (worst)
    #[serde(default = "default_poster_quality")]
    pub quality: u32,
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            quality: default_poster_quality(),
        }
    }
}

/// Preview clip settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Total length of the sampled preview in seconds
    #[serde(default = "default_total_duration")]
    pub total_duration: u32,
    /// Length of each sampled segment in seconds
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,
    /// x264 constant rate factor, 0..=51
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default)]
    pub preset: PreviewPreset,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            total_duration: default_total_duration(),
            segment_duration: default_segment_duration(),
            crf: default_crf(),
            preset: PreviewPreset::default(),
        }
    }
}

impl PreviewSettings {
    /// Number of segments sampled from a long source.
    ///
    /// Returns 0 when `segment_duration` is 0; validated settings never hit that.
    pub fn segment_count(&self) -> u32 {
        self.total_duration
            .checked_div(self.segment_duration)
            .unwrap_or(0)
    }
}

fn default_width() -> u32 {
    250
}

fn default_height() -> u32 {
    150
}

fn default_poster_quality() -> u32 {
    2
}

fn default_total_duration() -> u32 {
    12
}

fn default_segment_duration() -> u32 {
    2
}

fn default_crf() -> u32 {
    28
}

/// Complete settings record for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProcessingSettings {
    #[serde(default)]
    pub poster: PosterSettings,
    #[serde(default)]
    pub preview: PreviewSettings,
}

impl ProcessingSettings {
    /// Check every field against the ranges ffmpeg accepts
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poster.width == 0 {
            return Err(SettingsError::new("poster.width", "must be greater than 0"));
        }
        if self.poster.height == 0 {
            return Err(SettingsError::new("poster.height", "must be greater than 0"));
        }
        if !(1..=31).contains(&self.poster.quality) {
            return Err(SettingsError::new(
                "poster.quality",
                format!("{} is outside 1..=31", self.poster.quality),
            ));
        }
        if self.preview.width == 0 {
            return Err(SettingsError::new("preview.width", "must be greater than 0"));
        }
        if self.preview.height == 0 {
            return Err(SettingsError::new("preview.height", "must be greater than 0"));
        }
        if self.preview.segment_duration == 0 {
            return Err(SettingsError::new(
                "preview.segment_duration",
                "must be greater than 0",
            ));
        }
        if self.preview.total_duration < self.preview.segment_duration {
            return Err(SettingsError::new(
                "preview.total_duration",
                format!(
                    "{} is shorter than segment_duration {}",
                    self.preview.total_duration, self.preview.segment_duration
                ),
            ));
        }
        if self.preview.crf > 51 {
            return Err(SettingsError::new(
                "preview.crf",
                format!("{} is outside 0..=51", self.preview.crf),
            ));
        }
        Ok(())
    }
}
