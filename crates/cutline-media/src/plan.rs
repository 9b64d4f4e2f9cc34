//! Composition plan: the compiled form of a timeline.
//!
//! The plan is backend-neutral data. [`crate::graph`] turns it into an FFmpeg
//! filter graph; tests inspect it directly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A staged local input with the geometry the compiler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMedia {
    /// Local file path
    pub path: PathBuf,
    /// Picture width in pixels (0 for audio-only sources)
    pub width: u32,
    /// Picture height in pixels (0 for audio-only sources)
    pub height: u32,
}

impl SourceMedia {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }

    /// An audio-only source.
    pub fn audio(path: impl Into<PathBuf>) -> Self {
        Self::new(path, 0, 0)
    }
}

/// Output canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub background: String,
    pub sample_rate: u32,
    /// Document duration in seconds
    pub duration: f64,
}

/// How an input file is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputKind {
    /// Decoded as-is
    Media,
    /// A still image looped for `duration` seconds
    StillImage { duration: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInput {
    pub path: PathBuf,
    pub kind: InputKind,
}

/// One step of a clip's picture chain. Variants appear in a layer in the
/// order they must be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VideoOp {
    /// Keep source time `[start, end)` and rebase timestamps to zero
    Trim { start: f64, end: f64 },
    /// Multiply presentation timestamps
    TimeScale { factor: f64 },
    /// Hold the frame at `at` (clip time) for `hold` seconds
    FreezeFrame { at: f64, frame: f64, hold: f64 },
    /// Rectangular crop in source pixels
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Scale { width: u32, height: u32 },
    Flip { horizontal: bool, vertical: bool },
    /// Clockwise rotation with the canvas grown to the rotated bounds
    Rotate { degrees: f64 },
    /// Approximate 3D tilt: anisotropic pre-scale, padding, then shear
    Tilt {
        scale_x: f64,
        scale_y: f64,
        shear_x: f64,
        shear_y: f64,
    },
    /// Switch to a pixel format with an alpha plane
    AlphaFormat,
    /// Delay presentation by `offset` seconds
    Shift { offset: f64 },
}

/// Where and when a layer is drawn on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayPlacement {
    /// Canvas x of the layer's centre
    pub center_x: f64,
    /// Canvas y of the layer's centre
    pub center_y: f64,
    /// Drawn while `enable_start <= t < enable_end`
    pub enable_start: f64,
    pub enable_end: f64,
}

/// A visual clip compiled to a transform chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoLayer {
    pub clip_id: String,
    pub track_index: usize,
    /// Index into [`CompositionPlan::inputs`]
    pub input: usize,
    pub ops: Vec<VideoOp>,
    pub placement: OverlayPlacement,
}

/// One step of a clip's audio chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AudioOp {
    /// Normalise to a stereo stream at `sample_rate`
    Format { sample_rate: u32 },
    Trim { start: f64, end: f64 },
    /// Tempo change; always within `[0.5, 2.0]`
    Tempo { factor: f64 },
    /// Reinterpret samples at `rate` (shifts pitch and tempo together)
    SetRate { rate: u32 },
    /// Resample back to `rate`
    Resample { rate: u32 },
    Volume { gain: f64 },
    /// Per-channel linear gains
    Pan { left: f64, right: f64 },
    Delay { millis: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBranch {
    pub clip_id: String,
    pub input: usize,
    pub ops: Vec<AudioOp>,
}

/// Master audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AudioMix {
    /// No audio clips: silence for the whole document
    Silence { duration: f64 },
    /// Sum of branches, lasting as long as the longest one
    Mix { branches: Vec<AudioBranch> },
}

/// Compiled timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionPlan {
    pub canvas: Canvas,
    pub inputs: Vec<PlanInput>,
    /// Top-most layer first
    pub layers: Vec<VideoLayer>,
    pub audio: AudioMix,
}

impl CompositionPlan {
    /// Whether the plan is just the base canvas plus silence.
    pub fn is_blank(&self) -> bool {
        self.layers.is_empty() && matches!(self.audio, AudioMix::Silence { .. })
    }

    /// Layers in drawing order (bottom-most first).
    pub fn draw_order(&self) -> impl Iterator<Item = &VideoLayer> {
        self.layers.iter().rev()
    }
}
