//! Shared data models for the Cutline render service.
//!
//! This crate provides Serde-serializable types for:
//! - Timeline documents (tracks, clips, per-kind properties)
//! - Render jobs and their status lifecycle
//! - Output render settings
//! - Caller-facing status reports

pub mod error;
pub mod job;
pub mod settings;
pub mod timeline;

pub use error::{ValidationError, ValidationResult};
pub use job::{
    ArtifactRef, JobId, JobStatus, JobStatusReport, RenderJob, TransitionError, CANCELLED_REASON,
};
pub use settings::RenderSettings;
pub use timeline::{
    AudioProperties, Clip, ClipKind, Crop, Flip, FreezeFrame, Point, Size, TimelineDocument, Track,
    TrackKind, VisualProperties, Zoom, MAX_LAYER_PIXELS,
};
