//! FFmpeg rendering of a [`CompositionPlan`].

use std::path::Path;

use cutline_models::RenderSettings;

use crate::command::FfmpegCommand;
use crate::plan::{AudioMix, AudioOp, CompositionPlan, InputKind, VideoOp};

/// Label of the final video stream.
pub const VIDEO_OUT: &str = "vout";
/// Label of the final audio stream.
pub const AUDIO_OUT: &str = "aout";

/// Build the filter_complex text for a plan.
pub fn filter_graph(plan: &CompositionPlan) -> String {
    let canvas = &plan.canvas;
    let mut chains = Vec::new();

    chains.push(format!(
        "color=c={}:s={}x{}:r={}:d={}[base0]",
        canvas.background,
        canvas.width,
        canvas.height,
        canvas.fps,
        num(canvas.duration)
    ));

    let mut base = 0;
    for (i, layer) in plan.draw_order().enumerate() {
        let ops: Vec<String> = layer.ops.iter().map(video_filter).collect();
        chains.push(format!("[{}:v]{}[layer{}]", layer.input, ops.join(","), i));

        let p = &layer.placement;
        chains.push(format!(
            "[base{}][layer{}]overlay=x={}-overlay_w/2:y={}-overlay_h/2:eof_action=pass:enable='gte(t,{})*lt(t,{})'[base{}]",
            base,
            i,
            num(p.center_x),
            num(p.center_y),
            num(p.enable_start),
            num(p.enable_end),
            base + 1
        ));
        base += 1;
    }
    chains.push(format!("[base{}]format=yuv420p[{}]", base, VIDEO_OUT));

    match &plan.audio {
        AudioMix::Silence { duration } => chains.push(format!(
            "anullsrc=channel_layout=stereo:sample_rate={},atrim=duration={}[{}]",
            canvas.sample_rate,
            num(*duration),
            AUDIO_OUT
        )),
        AudioMix::Mix { branches } => {
            let mut labels = String::new();
            for (i, branch) in branches.iter().enumerate() {
                let ops: Vec<String> = branch.ops.iter().map(audio_filter).collect();
                let ops = if ops.is_empty() {
                    "anull".to_string()
                } else {
                    ops.join(",")
                };
                chains.push(format!("[{}:a]{}[aud{}]", branch.input, ops, i));
                labels.push_str(&format!("[aud{}]", i));
            }
            if branches.len() == 1 {
                chains.push(format!("{}anull[{}]", labels, AUDIO_OUT));
            } else {
                chains.push(format!(
                    "{}amix=inputs={}:duration=longest:normalize=0[{}]",
                    labels,
                    branches.len(),
                    AUDIO_OUT
                ));
            }
        }
    }

    chains.join(";")
}

/// Build the full encode command for a plan.
pub fn render_command(
    plan: &CompositionPlan,
    output: impl AsRef<Path>,
    settings: &RenderSettings,
) -> FfmpegCommand {
    let fps = plan.canvas.fps.to_string();
    let mut cmd = FfmpegCommand::new(output);

    for input in &plan.inputs {
        cmd = match input.kind {
            InputKind::Media => cmd.input(&input.path),
            InputKind::StillImage { duration } => cmd.input_with_args(
                [
                    "-loop".to_string(),
                    "1".to_string(),
                    "-framerate".to_string(),
                    fps.clone(),
                    "-t".to_string(),
                    format!("{:.3}", duration),
                ],
                &input.path,
            ),
        };
    }

    cmd.filter_complex(filter_graph(plan))
        .map(format!("[{}]", VIDEO_OUT))
        .map(format!("[{}]", AUDIO_OUT))
        .video_codec(&settings.video_codec)
        .preset(&settings.preset)
        .crf(settings.crf)
        .output_args(["-pix_fmt", "yuv420p", "-r"])
        .output_arg(fps)
        .audio_codec(&settings.audio_codec)
        .audio_bitrate(&settings.audio_bitrate)
        .output_arg("-ar")
        .output_arg(plan.canvas.sample_rate.to_string())
        .duration(plan.canvas.duration)
        .output_args(["-movflags", "+faststart"])
}

fn video_filter(op: &VideoOp) -> String {
    match op {
        VideoOp::Trim { start, end } => {
            format!("trim=start={}:end={},setpts=PTS-STARTPTS", num(*start), num(*end))
        }
        VideoOp::TimeScale { factor } => format!("setpts={}*PTS", num(*factor)),
        VideoOp::FreezeFrame { at, frame, hold } => format!(
            "trim=start={}:end={},setpts=PTS-STARTPTS,loop=loop=-1:size=1:start=0,setpts=N*{}/TB,trim=duration={}",
            num(*at),
            num(at + frame),
            num(*frame),
            num(*hold)
        ),
        VideoOp::Crop {
            x,
            y,
            width,
            height,
        } => format!("crop={}:{}:{}:{}", width, height, x, y),
        VideoOp::Scale { width, height } => format!("scale={}:{}", width, height),
        VideoOp::Flip {
            horizontal,
            vertical,
        } => {
            let mut parts = Vec::new();
            if *horizontal {
                parts.push("hflip");
            }
            if *vertical {
                parts.push("vflip");
            }
            parts.join(",")
        }
        VideoOp::Rotate { degrees } => {
            let radians = num(degrees.to_radians());
            format!(
                "format=rgba,rotate={r}:ow=rotw({r}):oh=roth({r}):c=none",
                r = radians
            )
        }
        VideoOp::Tilt {
            scale_x,
            scale_y,
            shear_x,
            shear_y,
        } => {
            let (pad_x, pad_y) = (num(shear_x.abs()), num(shear_y.abs()));
            format!(
                "format=rgba,scale=w=trunc(iw*{sx}/2)*2:h=trunc(ih*{sy}/2)*2,\
                 pad=w=iw+ceil(ih*{px}):h=ih+ceil(iw*{py}):x=ceil(ih*{px})/2:y=ceil(iw*{py})/2:color=black@0,\
                 shear=shx={shx}:shy={shy}:fillcolor=none",
                sx = num(*scale_x),
                sy = num(*scale_y),
                px = pad_x,
                py = pad_y,
                shx = num(*shear_x),
                shy = num(*shear_y)
            )
        }
        VideoOp::AlphaFormat => "format=yuva420p".to_string(),
        VideoOp::Shift { offset } => format!("setpts=PTS+{}/TB", num(*offset)),
    }
}

fn audio_filter(op: &AudioOp) -> String {
    match op {
        AudioOp::Format { sample_rate } => format!(
            "aformat=sample_fmts=fltp:sample_rates={}:channel_layouts=stereo",
            sample_rate
        ),
        AudioOp::Trim { start, end } => {
            format!("atrim=start={}:end={},asetpts=PTS-STARTPTS", num(*start), num(*end))
        }
        AudioOp::Tempo { factor } => format!("atempo={}", num(*factor)),
        AudioOp::SetRate { rate } => format!("asetrate={}", rate),
        AudioOp::Resample { rate } => format!("aresample={}", rate),
        AudioOp::Volume { gain } => format!("volume={}", num(*gain)),
        AudioOp::Pan { left, right } => {
            format!("pan=stereo|c0={}*c0|c1={}*c1", num(*left), num(*right))
        }
        AudioOp::Delay { millis } => format!("adelay={}:all=1", millis),
    }
}

/// Format a number for filter arguments: fixed precision, no trailing zeros.
fn num(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }
    let text = format!("{:.6}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{AudioBranch, Canvas, OverlayPlacement, PlanInput, VideoLayer};

    fn canvas() -> Canvas {
        Canvas {
            width: 1280,
            height: 720,
            fps: 30,
            background: "black".to_string(),
            sample_rate: 48_000,
            duration: 10.0,
        }
    }

    fn layer(clip_id: &str, input: usize, start: f64, end: f64) -> VideoLayer {
        VideoLayer {
            clip_id: clip_id.to_string(),
            track_index: input,
            input,
            ops: vec![
                VideoOp::Scale {
                    width: 640,
                    height: 360,
                },
                VideoOp::AlphaFormat,
            ],
            placement: OverlayPlacement {
                center_x: 320.0,
                center_y: 180.0,
                enable_start: start,
                enable_end: end,
            },
        }
    }

    #[test]
    fn test_num_formatting() {
        assert_eq!(num(10.0), "10");
        assert_eq!(num(0.5), "0.5");
        assert_eq!(num(1.0 / 3.0), "0.333333");
        assert_eq!(num(-0.0000001), "0");
        assert_eq!(num(-2.25), "-2.25");
    }

    #[test]
    fn test_blank_plan_graph() {
        let plan = CompositionPlan {
            canvas: canvas(),
            inputs: Vec::new(),
            layers: Vec::new(),
            audio: AudioMix::Silence { duration: 10.0 },
        };

        let graph = filter_graph(&plan);
        assert_eq!(
            graph,
            "color=c=black:s=1280x720:r=30:d=10[base0];\
             [base0]format=yuv420p[vout];\
             anullsrc=channel_layout=stereo:sample_rate=48000,atrim=duration=10[aout]"
        );
    }

    #[test]
    fn test_layers_drawn_bottom_up() {
        let plan = CompositionPlan {
            canvas: canvas(),
            inputs: vec![
                PlanInput {
                    path: "/stage/top.mp4".into(),
                    kind: InputKind::Media,
                },
                PlanInput {
                    path: "/stage/bottom.mp4".into(),
                    kind: InputKind::Media,
                },
            ],
            layers: vec![layer("top", 0, 2.0, 4.0), layer("bottom", 1, 0.0, 10.0)],
            audio: AudioMix::Silence { duration: 10.0 },
        };

        let graph = filter_graph(&plan);
        let bottom = graph.find("[1:v]").unwrap();
        let top = graph.find("[0:v]").unwrap();
        assert!(bottom < top);
        assert!(graph.contains("enable='gte(t,2)*lt(t,4)'"));
        assert!(graph.contains("overlay=x=320-overlay_w/2:y=180-overlay_h/2"));
        assert!(graph.contains("[base2]format=yuv420p[vout]"));
    }

    #[test]
    fn test_audio_mix() {
        let branch = |input: usize| AudioBranch {
            clip_id: format!("a{}", input),
            input,
            ops: vec![
                AudioOp::Trim { start: 0.0, end: 5.0 },
                AudioOp::Tempo { factor: 2.0 },
            ],
        };
        let plan = CompositionPlan {
            canvas: canvas(),
            inputs: Vec::new(),
            layers: Vec::new(),
            audio: AudioMix::Mix {
                branches: vec![branch(0), branch(1)],
            },
        };

        let graph = filter_graph(&plan);
        assert!(graph.contains("[0:a]atrim=start=0:end=5,asetpts=PTS-STARTPTS,atempo=2[aud0]"));
        assert!(graph.contains("[aud0][aud1]amix=inputs=2:duration=longest:normalize=0[aout]"));
    }

    #[test]
    fn test_render_command_loops_stills() {
        let plan = CompositionPlan {
            canvas: canvas(),
            inputs: vec![PlanInput {
                path: "/stage/logo.png".into(),
                kind: InputKind::StillImage { duration: 3.0 },
            }],
            layers: vec![layer("logo", 0, 0.0, 3.0)],
            audio: AudioMix::Silence { duration: 10.0 },
        };

        let args = render_command(&plan, "/stage/out.mp4", &RenderSettings::default()).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-loop 1 -framerate 30 -t 3.000 -i /stage/logo.png"));
        assert!(joined.contains("-map [vout] -map [aout]"));
        assert!(joined.contains("-t 10.000"));
        assert_eq!(args.last().map(String::as_str), Some("/stage/out.mp4"));
    }
}
