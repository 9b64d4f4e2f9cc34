//! Timeline document model.
//!
//! A document is produced collaboratively upstream and arrives here as a
//! snapshot. Field names follow the editor's camelCase wire format.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};

/// Slowest playback rate a clip may request.
pub const MIN_SPEED: f64 = 0.25;
/// Fastest playback rate a clip may request.
pub const MAX_SPEED: f64 = 4.0;
/// Upper bound on linear audio gain (+30 dB).
pub const MAX_VOLUME: f64 = 31.62;
/// Pitch shift range in semitones.
pub const MAX_PITCH_SEMITONES: f64 = 24.0;

/// Largest rendered layer edge, in pixels, after size and zoom.
pub const MAX_LAYER_PIXELS: f64 = 16384.0;

/// Tolerance for floating point timeline arithmetic (seconds).
pub const TIME_EPSILON: f64 = 1e-6;

/// A multi-track timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimelineDocument {
    /// Total output duration in seconds
    pub duration: f64,
    /// Tracks; for video, list order defines depth
    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// Track kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

/// A single track holding non-overlapping clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

/// Clip kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Video,
    Image,
    Audio,
}

impl ClipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipKind::Video => "video",
            ClipKind::Image => "image",
            ClipKind::Audio => "audio",
        }
    }

    /// Whether the clip contributes a picture.
    pub fn is_visual(&self) -> bool {
        matches!(self, ClipKind::Video | ClipKind::Image)
    }

    fn fits(&self, track: TrackKind) -> bool {
        match track {
            TrackKind::Video => self.is_visual(),
            TrackKind::Audio => *self == ClipKind::Audio,
        }
    }
}

/// A clip placed on the master timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub kind: ClipKind,
    /// Object store key of the uploaded source
    pub source: String,
    /// Placement start on the master timeline (seconds)
    pub start_time: f64,
    /// Placement length on the master timeline (seconds)
    pub duration: f64,
    /// Offset into the source (seconds)
    #[serde(default)]
    pub source_in: f64,
    /// Length of source material the editor reported, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_duration: Option<f64>,
    /// Picture properties (video and image clips)
    #[serde(default)]
    pub visual: VisualProperties,
    /// Sound properties (audio clips)
    #[serde(default)]
    pub audio: AudioProperties,
}

impl Clip {
    /// Master-timeline end of the clip.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Playback rate with the allowed range applied. Image clips never
    /// change speed.
    pub fn effective_speed(&self) -> f64 {
        let requested = match self.kind {
            ClipKind::Image => return 1.0,
            ClipKind::Video => self.visual.speed,
            ClipKind::Audio => self.audio.speed,
        };
        clamp_speed(requested)
    }

    /// Source-time end of the trimmed region: `sourceIn + duration * speed`.
    pub fn source_end(&self) -> f64 {
        self.source_in + self.duration * self.effective_speed()
    }
}

/// Clamp a requested speed into `[MIN_SPEED, MAX_SPEED]`. Non-finite or
/// non-positive values fall back to normal speed.
pub fn clamp_speed(speed: f64) -> f64 {
    if !speed.is_finite() || speed <= 0.0 {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Size {
    #[serde(alias = "w")]
    pub width: f64,
    #[serde(alias = "h")]
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Zoom {
    pub x: f64,
    pub y: f64,
    /// When set, `y` follows `x`
    #[serde(default)]
    pub linked: bool,
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            linked: true,
        }
    }
}

impl Zoom {
    /// Per-axis factors with linking applied.
    pub fn factors(&self) -> (f64, f64) {
        if self.linked {
            (self.x, self.x)
        } else {
            (self.x, self.y)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Flip {
    #[serde(default, alias = "h")]
    pub horizontal: bool,
    #[serde(default, alias = "v")]
    pub vertical: bool,
}

/// Crop offsets in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Crop {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub right: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub bottom: f64,
    /// Edge feathering requested by the editor
    #[serde(default)]
    pub softness: f64,
}

impl Crop {
    pub fn is_empty(&self) -> bool {
        self.left <= 0.0 && self.right <= 0.0 && self.top <= 0.0 && self.bottom <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FreezeFrame {
    #[serde(default)]
    pub enabled: bool,
    /// Clip-relative time of the held frame (seconds)
    #[serde(default)]
    pub at_time: f64,
}

/// Video and image clip properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualProperties {
    /// Canvas coordinate of the element's centre, before cropping
    pub position: Point,
    /// Authored element size; the cropped source size when absent
    pub size: Option<Size>,
    pub zoom: Zoom,
    /// Degrees, clockwise
    pub rotation: f64,
    /// Degrees of tilt around the horizontal axis
    pub pitch: f64,
    /// Degrees of tilt around the vertical axis
    pub yaw: f64,
    pub flip: Flip,
    pub crop: Crop,
    pub speed: f64,
    pub freeze_frame: FreezeFrame,
}

impl Default for VisualProperties {
    fn default() -> Self {
        Self {
            position: Point::default(),
            size: None,
            zoom: Zoom::default(),
            rotation: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            flip: Flip::default(),
            crop: Crop::default(),
            speed: 1.0,
            freeze_frame: FreezeFrame::default(),
        }
    }
}

/// Audio clip properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioProperties {
    /// Linear gain, 0..=31.62
    pub volume: f64,
    /// -1 (left) ..= 1 (right)
    pub pan: f64,
    /// Semitones, -24..=24
    pub pitch: f64,
    pub speed: f64,
}

impl Default for AudioProperties {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            pitch: 0.0,
            speed: 1.0,
        }
    }
}

impl AudioProperties {
    pub fn clamped_volume(&self) -> f64 {
        if self.volume.is_finite() {
            self.volume.clamp(0.0, MAX_VOLUME)
        } else {
            1.0
        }
    }

    pub fn clamped_pan(&self) -> f64 {
        if self.pan.is_finite() {
            self.pan.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn clamped_pitch(&self) -> f64 {
        if self.pitch.is_finite() {
            self.pitch.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES)
        } else {
            0.0
        }
    }
}

impl TimelineDocument {
    /// An empty document of the given length.
    pub fn empty(duration: f64) -> Self {
        Self {
            duration,
            tracks: Vec::new(),
        }
    }

    /// Iterate `(track_index, track, clip)` across the document.
    pub fn clips(&self) -> impl Iterator<Item = (usize, &Track, &Clip)> {
        self.tracks
            .iter()
            .enumerate()
            .flat_map(|(index, track)| track.clips.iter().map(move |clip| (index, track, clip)))
    }

    /// Distinct source references, in first-use order.
    pub fn source_refs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.clips()
            .filter_map(|(_, _, clip)| {
                seen.insert(clip.source.as_str())
                    .then(|| clip.source.clone())
            })
            .collect()
    }

    /// Check document invariants.
    ///
    /// Overlapping clips on one track are rejected rather than resolved;
    /// conflict resolution happens upstream in the editor.
    pub fn validate(&self) -> ValidationResult<()> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ValidationError::document(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }

        let mut clip_ids = HashSet::new();
        for track in &self.tracks {
            for clip in &track.clips {
                if !clip_ids.insert(clip.id.as_str()) {
                    return Err(ValidationError::document(format!(
                        "duplicate clip id {}",
                        clip.id
                    )));
                }
                self.validate_clip(track, clip)?;
            }
            validate_no_overlap(track)?;
        }

        Ok(())
    }

    fn validate_clip(&self, track: &Track, clip: &Clip) -> ValidationResult<()> {
        if !clip.kind.fits(track.kind) {
            return Err(ValidationError::clip(
                &clip.id,
                format!("{} clip placed on a {:?} track", clip.kind.as_str(), track.kind),
            ));
        }
        if !clip.duration.is_finite() || clip.duration <= 0.0 {
            return Err(ValidationError::clip(
                &clip.id,
                format!("duration must be positive, got {}", clip.duration),
            ));
        }
        if !clip.start_time.is_finite() || clip.start_time < 0.0 {
            return Err(ValidationError::clip(
                &clip.id,
                format!("startTime must be non-negative, got {}", clip.start_time),
            ));
        }
        if clip.end_time() > self.duration + TIME_EPSILON {
            return Err(ValidationError::clip(
                &clip.id,
                format!(
                    "ends at {:.3}s, past document duration {:.3}s",
                    clip.end_time(),
                    self.duration
                ),
            ));
        }
        if !clip.source_in.is_finite() || clip.source_in < 0.0 {
            return Err(ValidationError::clip(
                &clip.id,
                format!("sourceIn must be non-negative, got {}", clip.source_in),
            ));
        }
        if clip.source.trim().is_empty() {
            return Err(ValidationError::clip(&clip.id, "source reference is empty"));
        }

        if clip.kind.is_visual() {
            let visual = &clip.visual;
            let (zx, zy) = visual.zoom.factors();
            if !(zx.is_finite() && zy.is_finite() && zx > 0.0 && zy > 0.0) {
                return Err(ValidationError::clip(&clip.id, "zoom must be positive and finite"));
            }
            if let Some(size) = visual.size {
                if !(size.width.is_finite() && size.height.is_finite())
                    || !(size.width > 0.0 && size.height > 0.0)
                {
                    return Err(ValidationError::clip(&clip.id, "size must be positive and finite"));
                }
                let (w, h) = (size.width * zx, size.height * zy);
                if w > MAX_LAYER_PIXELS || h > MAX_LAYER_PIXELS {
                    return Err(ValidationError::clip(
                        &clip.id,
                        format!(
                            "scaled size {:.0}x{:.0} exceeds {} px",
                            w, h, MAX_LAYER_PIXELS
                        ),
                    ));
                }
            }
            if !(visual.position.x.is_finite() && visual.position.y.is_finite()) {
                return Err(ValidationError::clip(&clip.id, "position must be finite"));
            }
            let crop = &visual.crop;
            let offsets = [crop.left, crop.right, crop.top, crop.bottom];
            if offsets.iter().any(|o| !o.is_finite() || *o < 0.0) {
                return Err(ValidationError::clip(&clip.id, "crop offsets must be non-negative"));
            }
        }

        Ok(())
    }
}

fn validate_no_overlap(track: &Track) -> ValidationResult<()> {
    let mut ordered: Vec<&Clip> = track.clips.iter().collect();
    ordered.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    for pair in ordered.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev.end_time() > next.start_time + TIME_EPSILON {
            return Err(ValidationError::Overlap {
                track_id: track.id.clone(),
                clip_id: next.id.clone(),
                other_clip_id: prev.id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_clip(id: &str, start: f64, duration: f64) -> Clip {
        Clip {
            id: id.to_string(),
            kind: ClipKind::Video,
            source: format!("uploads/{}.mp4", id),
            start_time: start,
            duration,
            source_in: 0.0,
            source_duration: None,
            visual: VisualProperties::default(),
            audio: AudioProperties::default(),
        }
    }

    fn doc_with(clips: Vec<Clip>) -> TimelineDocument {
        TimelineDocument {
            duration: 10.0,
            tracks: vec![Track {
                id: "v1".to_string(),
                kind: TrackKind::Video,
                clips,
            }],
        }
    }

    #[test]
    fn test_speed_is_clamped_before_source_end() {
        let mut clip = video_clip("a", 0.0, 2.0);
        clip.source_in = 1.0;
        clip.visual.speed = 10.0;
        assert_eq!(clip.effective_speed(), MAX_SPEED);
        assert!((clip.source_end() - 9.0).abs() < 1e-9);

        clip.visual.speed = 0.1;
        assert_eq!(clip.effective_speed(), MIN_SPEED);
        assert!((clip.source_end() - 1.5).abs() < 1e-9);

        clip.kind = ClipKind::Image;
        clip.visual.speed = 3.0;
        assert_eq!(clip.effective_speed(), 1.0);
    }

    #[test]
    fn test_validate_accepts_adjacent_clips() {
        let doc = doc_with(vec![video_clip("a", 0.0, 5.0), video_clip("b", 5.0, 5.0)]);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let doc = doc_with(vec![video_clip("a", 0.0, 6.0), video_clip("b", 5.0, 5.0)]);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, ValidationError::Overlap { .. }));
        assert_eq!(err.clip_id(), Some("b"));
    }

    #[test]
    fn test_validate_rejects_clip_past_end() {
        let doc = doc_with(vec![video_clip("late", 8.0, 5.0)]);
        let err = doc.validate().unwrap_err();
        assert_eq!(err.clip_id(), Some("late"));
    }

    #[test]
    fn test_validate_rejects_non_positive_duration() {
        let doc = doc_with(vec![video_clip("zero", 0.0, 0.0)]);
        assert_eq!(doc.validate().unwrap_err().clip_id(), Some("zero"));
    }

    #[test]
    fn test_validate_rejects_audio_clip_on_video_track() {
        let mut clip = video_clip("a", 0.0, 1.0);
        clip.kind = ClipKind::Audio;
        let doc = doc_with(vec![clip]);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_source_in() {
        let mut clip = video_clip("a", 0.0, 1.0);
        clip.source_in = -0.5;
        assert!(doc_with(vec![clip]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_layer() {
        let mut clip = video_clip("huge", 0.0, 1.0);
        clip.visual.size = Some(Size {
            width: 1e10,
            height: 100.0,
        });
        let err = doc_with(vec![clip.clone()]).validate().unwrap_err();
        assert_eq!(err.clip_id(), Some("huge"));

        clip.visual.size = Some(Size {
            width: 10_000.0,
            height: 100.0,
        });
        clip.visual.zoom.x = 2.0;
        assert!(doc_with(vec![clip]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_geometry() {
        let mut clip = video_clip("nan", 0.0, 1.0);
        clip.visual.zoom.x = f64::INFINITY;
        assert!(doc_with(vec![clip.clone()]).validate().is_err());

        clip.visual.zoom.x = 1.0;
        clip.visual.size = Some(Size {
            width: f64::NAN,
            height: 100.0,
        });
        assert!(doc_with(vec![clip.clone()]).validate().is_err());

        clip.visual.size = None;
        clip.visual.position.x = f64::NAN;
        assert!(doc_with(vec![clip]).validate().is_err());
    }

    #[test]
    fn test_deserialize_editor_payload() {
        let json = r#"{
            "duration": 10,
            "tracks": [{
                "id": "t0",
                "kind": "video",
                "clips": [{
                    "id": "c1",
                    "kind": "video",
                    "source": "uploads/c1.mp4",
                    "startTime": 0,
                    "duration": 10,
                    "visual": {
                        "position": {"x": 960, "y": 540},
                        "size": {"w": 1280, "h": 720},
                        "freezeFrame": {"enabled": true, "atTime": 1.5}
                    }
                }]
            }]
        }"#;

        let doc: TimelineDocument = serde_json::from_str(json).unwrap();
        let clip = &doc.tracks[0].clips[0];
        assert_eq!(clip.visual.size.unwrap().width, 1280.0);
        assert!(clip.visual.freeze_frame.enabled);
        assert_eq!(clip.visual.speed, 1.0);
        assert_eq!(clip.audio.volume, 1.0);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_source_refs_are_distinct() {
        let mut b = video_clip("b", 5.0, 5.0);
        b.source = "uploads/a.mp4".to_string();
        let doc = doc_with(vec![video_clip("a", 0.0, 5.0), b]);
        assert_eq!(doc.source_refs(), vec!["uploads/a.mp4".to_string()]);
    }
}
