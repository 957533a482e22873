use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants;

/// On-storage encoding of the video stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Headerless RGB565 frames of a fixed size.
    Raw,
    /// Back-to-back baseline JPEG images.
    Mjpeg,
}

/// Everything a playback session needs to know before it starts.
///
/// Values come from [`constants`] unless a JSON config file or a CLI flag
/// overrides them, in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub mount: PathBuf,
    pub input: String,
    pub format: SourceFormat,
    pub display_width: u32,
    pub display_height: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub offset_y: u32,
    pub chunk_size: usize,
    pub max_frame_bytes: usize,
    pub flush_timeout_ms: u64,
    pub vsync_us: u64,
    pub rate_smoothing: f64,
    pub replay: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mount: PathBuf::from(constants::MOUNT_POINT),
            input: constants::DEFAULT_STREAM.to_string(),
            format: SourceFormat::Raw,
            display_width: constants::DISPLAY_WIDTH,
            display_height: constants::DISPLAY_HEIGHT,
            video_width: constants::VIDEO_WIDTH,
            video_height: constants::VIDEO_HEIGHT,
            offset_y: constants::VERTICAL_OFFSET,
            chunk_size: constants::DEMUX_CHUNK_SIZE,
            max_frame_bytes: constants::MAX_FRAME_BYTES,
            flush_timeout_ms: constants::FLUSH_TIMEOUT.as_millis() as u64,
            vsync_us: constants::VSYNC_DELAY.as_micros() as u64,
            rate_smoothing: constants::RATE_SMOOTHING,
            replay: false,
        }
    }
}

impl PlaybackConfig {
    /// Load from a JSON file, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.display_width == 0 || self.display_height == 0 {
            anyhow::bail!("Display size must be non-zero");
        }
        if self.video_width == 0 || self.video_height == 0 {
            anyhow::bail!("Video size must be non-zero");
        }
        if self.video_width > self.display_width {
            anyhow::bail!(
                "Video width {} exceeds display width {}",
                self.video_width,
                self.display_width
            );
        }
        match self.offset_y.checked_add(self.video_height) {
            Some(bottom) if bottom <= self.display_height => {}
            _ => anyhow::bail!(
                "Video rows starting at {} with height {} do not fit a display of height {}",
                self.offset_y,
                self.video_height,
                self.display_height
            ),
        }
        if self.chunk_size < 2 {
            anyhow::bail!("Chunk size must hold at least the 2-byte end-of-image marker");
        }
        if !(0.0..1.0).contains(&self.rate_smoothing) {
            anyhow::bail!("Rate smoothing must be in [0, 1), got {}", self.rate_smoothing);
        }
        Ok(())
    }

    /// Bytes of one raw frame: packed 16-bit pixels, no header.
    pub fn raw_frame_bytes(&self) -> usize {
        self.video_width as usize * self.video_height as usize * (constants::DISPLAY_DEPTH as usize / 8)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn vsync_delay(&self) -> Duration {
        Duration::from_micros(self.vsync_us)
    }
}
