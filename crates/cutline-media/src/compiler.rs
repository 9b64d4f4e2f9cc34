//! Filter graph compiler.
//!
//! Turns a [`TimelineDocument`] plus resolved local media into a
//! [`CompositionPlan`]. Pure: no I/O, no clocks.

use std::collections::HashMap;

use cutline_models::{
    Clip, ClipKind, RenderSettings, TimelineDocument, ValidationError, ValidationResult,
    MAX_LAYER_PIXELS,
};

use crate::plan::{
    AudioBranch, AudioMix, AudioOp, Canvas, CompositionPlan, InputKind, OverlayPlacement,
    PlanInput, SourceMedia, VideoLayer, VideoOp,
};

/// Lowest factor a single tempo operator accepts.
pub const MIN_TEMPO: f64 = 0.5;
/// Highest factor a single tempo operator accepts.
pub const MAX_TEMPO: f64 = 2.0;

/// Shear applied per unit of `sin(angle)` when approximating tilt.
const TILT_SHEAR: f64 = 0.3;

const NEUTRAL: f64 = 1e-9;

/// Compile a document into a composition plan.
///
/// `media` maps each clip's source reference to its staged local file.
pub fn compile(
    document: &TimelineDocument,
    media: &HashMap<String, SourceMedia>,
    settings: &RenderSettings,
) -> ValidationResult<CompositionPlan> {
    document.validate()?;

    let canvas = Canvas {
        width: settings.width,
        height: settings.height,
        fps: settings.fps.max(1),
        background: settings.background.clone(),
        sample_rate: settings.sample_rate,
        duration: document.duration,
    };

    let mut visual: Vec<(usize, &Clip)> = Vec::new();
    let mut audible: Vec<(usize, &Clip)> = Vec::new();
    for (track_index, _, clip) in document.clips() {
        if clip.kind.is_visual() {
            visual.push((track_index, clip));
        } else {
            audible.push((track_index, clip));
        }
    }

    // Higher track index draws on top, so it comes first.
    visual.sort_by(|(ta, a), (tb, b)| {
        tb.cmp(ta)
            .then_with(|| a.start_time.total_cmp(&b.start_time))
    });
    audible.sort_by(|(ta, a), (tb, b)| {
        ta.cmp(tb)
            .then_with(|| a.start_time.total_cmp(&b.start_time))
    });

    let mut inputs = Vec::new();
    let mut layers = Vec::with_capacity(visual.len());
    for (track_index, clip) in visual {
        let source = resolve(clip, media)?;
        let input = inputs.len();
        inputs.push(PlanInput {
            path: source.path.clone(),
            kind: match clip.kind {
                ClipKind::Image => InputKind::StillImage {
                    duration: clip.duration,
                },
                _ => InputKind::Media,
            },
        });
        layers.push(compile_visual(clip, track_index, input, source, &canvas)?);
    }

    let mut branches = Vec::with_capacity(audible.len());
    for (_, clip) in audible {
        let source = resolve(clip, media)?;
        let input = inputs.len();
        inputs.push(PlanInput {
            path: source.path.clone(),
            kind: InputKind::Media,
        });
        branches.push(AudioBranch {
            clip_id: clip.id.clone(),
            input,
            ops: audio_ops(clip, canvas.sample_rate),
        });
    }

    let audio = if branches.is_empty() {
        AudioMix::Silence {
            duration: document.duration,
        }
    } else {
        AudioMix::Mix { branches }
    };

    Ok(CompositionPlan {
        canvas,
        inputs,
        layers,
        audio,
    })
}

fn resolve<'a>(clip: &Clip, media: &'a HashMap<String, SourceMedia>) -> ValidationResult<&'a SourceMedia> {
    media
        .get(&clip.source)
        .ok_or_else(|| ValidationError::UnresolvedSource {
            clip_id: clip.id.clone(),
            reference: clip.source.clone(),
        })
}

fn compile_visual(
    clip: &Clip,
    track_index: usize,
    input: usize,
    source: &SourceMedia,
    canvas: &Canvas,
) -> ValidationResult<VideoLayer> {
    if source.width == 0 || source.height == 0 {
        return Err(ValidationError::clip(
            &clip.id,
            format!("source {} has no picture", clip.source),
        ));
    }

    let visual = &clip.visual;
    let mut ops = Vec::new();

    // 1-3: timing. Stills are looped at input level and have no source time.
    if clip.kind == ClipKind::Video {
        let speed = clip.effective_speed();
        ops.push(VideoOp::Trim {
            start: clip.source_in,
            end: clip.source_end(),
        });
        if (speed - 1.0).abs() > NEUTRAL {
            ops.push(VideoOp::TimeScale { factor: 1.0 / speed });
        }
        if visual.freeze_frame.enabled {
            let frame = 1.0 / f64::from(canvas.fps);
            let latest = (clip.duration - frame).max(0.0);
            ops.push(VideoOp::FreezeFrame {
                at: visual.freeze_frame.at_time.clamp(0.0, latest),
                frame,
                hold: clip.duration,
            });
        }
    }

    // 4: crop, in source pixels
    let crop = &visual.crop;
    let (src_w, src_h) = (f64::from(source.width), f64::from(source.height));
    let crop_x = crop.left.round();
    let crop_y = crop.top.round();
    let cropped_w = (src_w - crop_x - crop.right.round()).max(0.0);
    let cropped_h = (src_h - crop_y - crop.bottom.round()).max(0.0);
    if cropped_w < 2.0 || cropped_h < 2.0 {
        return Err(ValidationError::clip(
            &clip.id,
            format!(
                "crop leaves {}x{} of a {}x{} source",
                cropped_w, cropped_h, source.width, source.height
            ),
        ));
    }
    if !crop.is_empty() {
        ops.push(VideoOp::Crop {
            x: crop_x as u32,
            y: crop_y as u32,
            width: cropped_w as u32,
            height: cropped_h as u32,
        });
    }

    // 5: the visible region fills size * zoom
    let (zoom_x, zoom_y) = visual.zoom.factors();
    let (base_w, base_h) = match visual.size {
        Some(size) => (size.width, size.height),
        None => (cropped_w, cropped_h),
    };
    let (scaled_w, scaled_h) = (base_w * zoom_x, base_h * zoom_y);
    if scaled_w > MAX_LAYER_PIXELS || scaled_h > MAX_LAYER_PIXELS {
        return Err(ValidationError::clip(
            &clip.id,
            format!(
                "scaled size {:.0}x{:.0} exceeds {} px",
                scaled_w, scaled_h, MAX_LAYER_PIXELS
            ),
        ));
    }
    let target_w = even_pixels(scaled_w);
    let target_h = even_pixels(scaled_h);
    ops.push(VideoOp::Scale {
        width: target_w,
        height: target_h,
    });
    let scale_x = f64::from(target_w) / cropped_w;
    let scale_y = f64::from(target_h) / cropped_h;

    // Offset of the crop window's centre from the uncropped frame's centre,
    // carried through the remaining transforms.
    let mut dx = (crop.left - crop.right) / 2.0 * scale_x;
    let mut dy = (crop.top - crop.bottom) / 2.0 * scale_y;

    // 6
    if visual.flip.horizontal || visual.flip.vertical {
        ops.push(VideoOp::Flip {
            horizontal: visual.flip.horizontal,
            vertical: visual.flip.vertical,
        });
        if visual.flip.horizontal {
            dx = -dx;
        }
        if visual.flip.vertical {
            dy = -dy;
        }
    }

    // 7
    let rotation = visual.rotation % 360.0;
    if rotation.abs() > NEUTRAL {
        ops.push(VideoOp::Rotate { degrees: rotation });
        let (sin, cos) = rotation.to_radians().sin_cos();
        (dx, dy) = (dx * cos - dy * sin, dx * sin + dy * cos);
    }

    // 8
    if visual.pitch.abs() > NEUTRAL || visual.yaw.abs() > NEUTRAL {
        let (pitch, yaw) = (visual.pitch.to_radians(), visual.yaw.to_radians());
        let scale_x = yaw.cos().abs().max(0.01);
        let scale_y = pitch.cos().abs().max(0.01);
        ops.push(VideoOp::Tilt {
            scale_x,
            scale_y,
            shear_x: pitch.sin() * TILT_SHEAR,
            shear_y: yaw.sin() * TILT_SHEAR,
        });
        dx *= scale_x;
        dy *= scale_y;
    }

    // 9-10
    ops.push(VideoOp::AlphaFormat);
    if clip.start_time > NEUTRAL {
        ops.push(VideoOp::Shift {
            offset: clip.start_time,
        });
    }

    Ok(VideoLayer {
        clip_id: clip.id.clone(),
        track_index,
        input,
        ops,
        placement: OverlayPlacement {
            center_x: visual.position.x + dx,
            center_y: visual.position.y + dy,
            enable_start: clip.start_time,
            enable_end: clip.end_time(),
        },
    })
}

fn audio_ops(clip: &Clip, sample_rate: u32) -> Vec<AudioOp> {
    let audio = &clip.audio;
    let mut ops = vec![
        AudioOp::Format { sample_rate },
        AudioOp::Trim {
            start: clip.source_in,
            end: clip.source_end(),
        },
    ];

    ops.extend(
        tempo_chain(clip.effective_speed())
            .into_iter()
            .map(|factor| AudioOp::Tempo { factor }),
    );

    let semitones = audio.clamped_pitch();
    if semitones.abs() > NEUTRAL {
        let shifted = (f64::from(sample_rate) * 2f64.powf(semitones / 12.0)).round() as u32;
        // Compensate with the ratio actually applied, not the ideal one.
        let ratio = f64::from(shifted) / f64::from(sample_rate);
        ops.push(AudioOp::SetRate { rate: shifted });
        ops.push(AudioOp::Resample { rate: sample_rate });
        ops.extend(
            tempo_chain(1.0 / ratio)
                .into_iter()
                .map(|factor| AudioOp::Tempo { factor }),
        );
    }

    let volume = audio.clamped_volume();
    if (volume - 1.0).abs() > NEUTRAL {
        ops.push(AudioOp::Volume { gain: volume });
    }

    let pan = audio.clamped_pan();
    if pan.abs() > NEUTRAL {
        ops.push(AudioOp::Pan {
            left: (1.0 - pan).min(1.0),
            right: (1.0 + pan).min(1.0),
        });
    }

    let millis = (clip.start_time * 1000.0).round() as u64;
    if millis > 0 {
        ops.push(AudioOp::Delay { millis });
    }

    ops
}

/// Split a tempo factor into operators within `[MIN_TEMPO, MAX_TEMPO]`
/// whose product is `factor`. Returns no operators for a neutral factor.
pub fn tempo_chain(factor: f64) -> Vec<f64> {
    if !factor.is_finite() || factor <= 0.0 || (factor - 1.0).abs() <= NEUTRAL {
        return Vec::new();
    }

    let mut chain = Vec::new();
    let mut rest = factor;
    while rest > MAX_TEMPO {
        chain.push(MAX_TEMPO);
        rest /= MAX_TEMPO;
    }
    while rest < MIN_TEMPO {
        chain.push(MIN_TEMPO);
        rest /= MIN_TEMPO;
    }
    if (rest - 1.0).abs() > NEUTRAL {
        chain.push(rest);
    }
    chain
}

fn even_pixels(value: f64) -> u32 {
    let half = (value / 2.0).round().clamp(1.0, f64::from(u32::MAX / 2));
    half as u32 * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_models::{AudioProperties, Crop, Point, Size, Track, TrackKind, VisualProperties};

    fn clip(id: &str, kind: ClipKind, start: f64, duration: f64) -> Clip {
        Clip {
            id: id.to_string(),
            kind,
            source: format!("uploads/{}", id),
            start_time: start,
            duration,
            source_in: 0.0,
            source_duration: None,
            visual: VisualProperties::default(),
            audio: AudioProperties::default(),
        }
    }

    fn track(id: &str, kind: TrackKind, clips: Vec<Clip>) -> Track {
        Track {
            id: id.to_string(),
            kind,
            clips,
        }
    }

    fn media_for(doc: &TimelineDocument) -> HashMap<String, SourceMedia> {
        doc.clips()
            .map(|(_, _, c)| {
                let media = if c.kind.is_visual() {
                    SourceMedia::new(format!("/stage/{}", c.id), 1920, 1080)
                } else {
                    SourceMedia::audio(format!("/stage/{}", c.id))
                };
                (c.source.clone(), media)
            })
            .collect()
    }

    fn compile_doc(doc: &TimelineDocument) -> ValidationResult<CompositionPlan> {
        compile(doc, &media_for(doc), &RenderSettings::default())
    }

    #[test]
    fn test_empty_timeline_is_blank_canvas_with_silence() {
        let doc = TimelineDocument::empty(12.5);
        let plan = compile_doc(&doc).unwrap();

        assert!(plan.is_blank());
        assert!(plan.inputs.is_empty());
        assert_eq!(plan.audio, AudioMix::Silence { duration: 12.5 });
        assert_eq!(plan.canvas.duration, 12.5);
    }

    #[test]
    fn test_single_video_and_audio_clip() {
        let mut video = clip("v", ClipKind::Video, 0.0, 10.0);
        video.visual.position = Point { x: 960.0, y: 540.0 };
        let audio = clip("a", ClipKind::Audio, 0.0, 10.0);
        let doc = TimelineDocument {
            duration: 10.0,
            tracks: vec![
                track("t0", TrackKind::Video, vec![video]),
                track("t1", TrackKind::Audio, vec![audio]),
            ],
        };

        let plan = compile_doc(&doc).unwrap();

        assert_eq!(plan.layers.len(), 1);
        let layer = &plan.layers[0];
        assert_eq!(layer.placement.enable_start, 0.0);
        assert_eq!(layer.placement.enable_end, 10.0);
        assert_eq!((layer.placement.center_x, layer.placement.center_y), (960.0, 540.0));
        assert!(!layer.ops.iter().any(|op| matches!(op, VideoOp::Shift { .. })));

        let AudioMix::Mix { branches } = &plan.audio else {
            panic!("expected a mix");
        };
        assert_eq!(branches.len(), 1);
        assert!(!branches[0]
            .ops
            .iter()
            .any(|op| matches!(op, AudioOp::Tempo { .. } | AudioOp::SetRate { .. })));
    }

    #[test]
    fn test_video_ops_follow_fixed_order() {
        let mut c = clip("v", ClipKind::Video, 2.0, 4.0);
        c.visual.speed = 2.0;
        c.visual.freeze_frame.enabled = true;
        c.visual.freeze_frame.at_time = 1.0;
        c.visual.crop = Crop {
            left: 100.0,
            ..Crop::default()
        };
        c.visual.flip.horizontal = true;
        c.visual.rotation = 30.0;
        c.visual.pitch = 10.0;
        let doc = TimelineDocument {
            duration: 10.0,
            tracks: vec![track("t0", TrackKind::Video, vec![c])],
        };

        let plan = compile_doc(&doc).unwrap();
        let names: Vec<&str> = plan.layers[0]
            .ops
            .iter()
            .map(|op| match op {
                VideoOp::Trim { .. } => "trim",
                VideoOp::TimeScale { .. } => "timescale",
                VideoOp::FreezeFrame { .. } => "freeze",
                VideoOp::Crop { .. } => "crop",
                VideoOp::Scale { .. } => "scale",
                VideoOp::Flip { .. } => "flip",
                VideoOp::Rotate { .. } => "rotate",
                VideoOp::Tilt { .. } => "tilt",
                VideoOp::AlphaFormat => "alpha",
                VideoOp::Shift { .. } => "shift",
            })
            .collect();

        assert_eq!(
            names,
            ["trim", "timescale", "freeze", "crop", "scale", "flip", "rotate", "tilt", "alpha", "shift"]
        );
        assert_eq!(plan.layers[0].ops[0], VideoOp::Trim { start: 0.0, end: 8.0 });
    }

    #[test]
    fn test_crop_aware_scaling_and_anchor() {
        let mut c = clip("v", ClipKind::Video, 0.0, 5.0);
        c.visual.position = Point { x: 500.0, y: 400.0 };
        c.visual.size = Some(Size {
            width: 800.0,
            height: 1080.0,
        });
        c.visual.crop = Crop {
            left: 320.0,
            right: 0.0,
            top: 0.0,
            bottom: 0.0,
            softness: 0.0,
        };
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![c])],
        };

        let layer = compile_doc(&doc).unwrap().layers.remove(0);
        assert!(layer.ops.contains(&VideoOp::Crop {
            x: 320,
            y: 0,
            width: 1600,
            height: 1080,
        }));
        assert!(layer.ops.contains(&VideoOp::Scale {
            width: 800,
            height: 1080,
        }));
        // 320px of source at 0.5 scale, half of it on each side
        assert!((layer.placement.center_x - 580.0).abs() < 1e-9);
        assert_eq!(layer.placement.center_y, 400.0);
    }

    #[test]
    fn test_symmetric_crop_keeps_anchor() {
        let mut c = clip("v", ClipKind::Video, 0.0, 5.0);
        c.visual.position = Point { x: 100.0, y: 100.0 };
        c.visual.crop = Crop {
            left: 10.0,
            right: 10.0,
            top: 20.0,
            bottom: 20.0,
            softness: 0.5,
        };
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![c])],
        };

        let layer = compile_doc(&doc).unwrap().layers.remove(0);
        assert_eq!((layer.placement.center_x, layer.placement.center_y), (100.0, 100.0));
        assert!(layer.ops.contains(&VideoOp::Scale {
            width: 1900,
            height: 1040,
        }));
    }

    #[test]
    fn test_zoom_linked_uses_x_for_both_axes() {
        let mut c = clip("v", ClipKind::Video, 0.0, 5.0);
        c.visual.size = Some(Size {
            width: 100.0,
            height: 50.0,
        });
        c.visual.zoom.x = 1.5;
        c.visual.zoom.y = 3.0;
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![c])],
        };

        let layer = compile_doc(&doc).unwrap().layers.remove(0);
        assert!(layer.ops.contains(&VideoOp::Scale {
            width: 150,
            height: 76,
        }));
    }

    #[test]
    fn test_layers_are_top_most_first() {
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![
                track("bottom", TrackKind::Video, vec![clip("a", ClipKind::Video, 0.0, 5.0)]),
                track("top", TrackKind::Video, vec![clip("b", ClipKind::Image, 1.0, 2.0)]),
            ],
        };

        let plan = compile_doc(&doc).unwrap();
        let ids: Vec<&str> = plan.layers.iter().map(|l| l.clip_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        let drawn: Vec<&str> = plan.draw_order().map(|l| l.clip_id.as_str()).collect();
        assert_eq!(drawn, ["a", "b"]);
    }

    #[test]
    fn test_image_clip_is_looped_and_untimed() {
        let mut image = clip("img", ClipKind::Image, 1.0, 3.0);
        image.visual.speed = 2.0;
        image.source_in = 5.0;
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![image])],
        };

        let plan = compile_doc(&doc).unwrap();
        assert_eq!(plan.inputs[0].kind, InputKind::StillImage { duration: 3.0 });
        let ops = &plan.layers[0].ops;
        assert!(!ops
            .iter()
            .any(|op| matches!(op, VideoOp::Trim { .. } | VideoOp::TimeScale { .. })));
        assert_eq!(ops.last(), Some(&VideoOp::Shift { offset: 1.0 }));
    }

    #[test]
    fn test_audio_chain() {
        let mut c = clip("a", ClipKind::Audio, 1.5, 2.0);
        c.audio.speed = 3.0;
        c.audio.pitch = 12.0;
        c.audio.volume = 2.0;
        c.audio.pan = -0.5;
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Audio, vec![c])],
        };

        let plan = compile_doc(&doc).unwrap();
        let AudioMix::Mix { branches } = plan.audio else {
            panic!("expected a mix");
        };
        assert_eq!(
            branches[0].ops,
            vec![
                AudioOp::Format { sample_rate: 48_000 },
                AudioOp::Trim { start: 0.0, end: 6.0 },
                AudioOp::Tempo { factor: 2.0 },
                AudioOp::Tempo { factor: 1.5 },
                AudioOp::SetRate { rate: 96_000 },
                AudioOp::Resample { rate: 48_000 },
                AudioOp::Tempo { factor: 0.5 },
                AudioOp::Volume { gain: 2.0 },
                AudioOp::Pan { left: 1.0, right: 0.5 },
                AudioOp::Delay { millis: 1500 },
            ]
        );
    }

    #[test]
    fn test_tempo_chain_product_and_bounds() {
        let mut factor = 0.25;
        while factor <= 4.0 {
            let chain = tempo_chain(factor);
            let product: f64 = chain.iter().product();
            assert!((product - factor).abs() < 1e-3, "factor {}", factor);
            assert!(chain.iter().all(|f| (MIN_TEMPO..=MAX_TEMPO).contains(f)));
            factor += 0.01;
        }
        assert!(tempo_chain(1.0).is_empty());
        assert_eq!(tempo_chain(0.125), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_unresolved_source_names_clip() {
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![clip("v", ClipKind::Video, 0.0, 5.0)])],
        };

        let err = compile(&doc, &HashMap::new(), &RenderSettings::default()).unwrap_err();
        assert_eq!(err.clip_id(), Some("v"));
    }

    #[test]
    fn test_overlapping_clips_are_rejected() {
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track(
                "t0",
                TrackKind::Video,
                vec![
                    clip("a", ClipKind::Video, 0.0, 3.0),
                    clip("b", ClipKind::Video, 2.0, 3.0),
                ],
            )],
        };

        let err = compile_doc(&doc).unwrap_err();
        assert!(matches!(err, ValidationError::Overlap { .. }));
    }

    #[test]
    fn test_oversized_layer_is_rejected_not_panicking() {
        let mut sized = clip("v", ClipKind::Video, 0.0, 5.0);
        sized.visual.size = Some(Size {
            width: 1e10,
            height: 100.0,
        });
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![sized])],
        };
        assert_eq!(compile_doc(&doc).unwrap_err().clip_id(), Some("v"));

        // No authored size: the limit applies to the zoomed source.
        let mut zoomed = clip("z", ClipKind::Video, 0.0, 5.0);
        zoomed.visual.zoom.x = 1e6;
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![zoomed])],
        };
        assert!(doc.validate().is_ok());
        assert_eq!(compile_doc(&doc).unwrap_err().clip_id(), Some("z"));
    }

    #[test]
    fn test_even_pixels_saturates() {
        assert_eq!(even_pixels(1e12), u32::MAX / 2 * 2);
        assert_eq!(even_pixels(0.0), 2);
        assert_eq!(even_pixels(101.0), 102);
    }

    #[test]
    fn test_crop_that_removes_frame_is_rejected() {
        let mut c = clip("v", ClipKind::Video, 0.0, 5.0);
        c.visual.crop.left = 1000.0;
        c.visual.crop.right = 1000.0;
        let doc = TimelineDocument {
            duration: 5.0,
            tracks: vec![track("t0", TrackKind::Video, vec![c])],
        };

        assert_eq!(compile_doc(&doc).unwrap_err().clip_id(), Some("v"));
    }
}
