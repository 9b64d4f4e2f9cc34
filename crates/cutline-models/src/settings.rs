//! Output render settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Sample rate every audio branch is normalised to
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Canvas and encoder configuration shared by every job a worker renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderSettings {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Output frame rate
    pub fps: u32,
    /// Base canvas colour (FFmpeg colour syntax)
    pub background: String,
    /// Audio sample rate (Hz)
    pub sample_rate: u32,
    /// Video codec (e.g., "libx264", "h264_nvenc")
    pub video_codec: String,
    /// Encoding preset (e.g., "fast", "medium")
    pub preset: String,
    /// Constant Rate Factor (0-51, lower is better)
    pub crf: u8,
    /// Audio codec
    pub audio_codec: String,
    /// Audio bitrate
    pub audio_bitrate: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            background: "black".to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl RenderSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            width: env_parse("RENDER_WIDTH").unwrap_or(defaults.width),
            height: env_parse("RENDER_HEIGHT").unwrap_or(defaults.height),
            fps: env_parse("RENDER_FPS").unwrap_or(defaults.fps),
            background: std::env::var("RENDER_BACKGROUND").unwrap_or(defaults.background),
            sample_rate: env_parse("RENDER_SAMPLE_RATE").unwrap_or(defaults.sample_rate),
            video_codec: std::env::var("RENDER_VIDEO_CODEC").unwrap_or(defaults.video_codec),
            preset: std::env::var("RENDER_PRESET").unwrap_or(defaults.preset),
            crf: env_parse("RENDER_CRF").unwrap_or(defaults.crf),
            audio_codec: std::env::var("RENDER_AUDIO_CODEC").unwrap_or(defaults.audio_codec),
            audio_bitrate: std::env::var("RENDER_AUDIO_BITRATE").unwrap_or(defaults.audio_bitrate),
        }
    }

    /// Returns new settings with a different canvas size.
    pub fn with_canvas(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RenderSettings::default();
        assert_eq!((settings.width, settings.height), (1920, 1080));
        assert_eq!(settings.sample_rate, 48_000);
        assert_eq!(settings.video_codec, "libx264");
    }

    #[test]
    fn test_with_canvas() {
        let settings = RenderSettings::default().with_canvas(1080, 1920);
        assert_eq!((settings.width, settings.height), (1080, 1920));
    }
}
