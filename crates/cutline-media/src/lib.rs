//! Timeline compilation and FFmpeg CLI wrapper.
//!
//! This crate provides:
//! - The filter graph compiler: timeline document to [`CompositionPlan`]
//! - FFmpeg filter graph rendering of a plan
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`, delivered over a bounded channel
//! - FFprobe source probing

pub mod command;
pub mod compiler;
pub mod error;
pub mod graph;
pub mod plan;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, MAX_DIAGNOSTIC_LINES};
pub use compiler::{compile, tempo_chain};
pub use error::{MediaError, MediaResult};
pub use graph::{filter_graph, render_command};
pub use plan::{
    AudioBranch, AudioMix, AudioOp, Canvas, CompositionPlan, InputKind, OverlayPlacement,
    PlanInput, SourceMedia, VideoLayer, VideoOp,
};
pub use probe::{probe_media, MediaInfo};
pub use progress::FfmpegProgress;
