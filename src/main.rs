use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use maskprop::oracle::{self, MaskOracle, ObjectId, Point, PointLabel};
use maskprop::output::{FrameDirectory, ImageFormat};
use maskprop::overlay::{Compositor, Palette, DEFAULT_BLEND_WEIGHT};
use maskprop::{source, PropagationCache};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video file or directory of frame images
    #[arg(short, long)]
    video: PathBuf,

    /// Path to the SAM image encoder (ONNX file)
    #[arg(long)]
    encoder: PathBuf,

    /// Path to the SAM prompt decoder (ONNX file)
    #[arg(long)]
    decoder: PathBuf,

    /// Point prompt as OBJECT:FRAME:X:Y:(+|-), applied in order.
    /// OBJECT may be `?` to pick the object under the point
    #[arg(short, long = "prompt")]
    prompts: Vec<PromptArg>,

    /// Propagate through this frame (defaults to the last frame)
    #[arg(long)]
    until: Option<usize>,

    /// Directory to write overlay frames into
    #[arg(short, long, default_value = "masks")]
    output: PathBuf,

    /// Image format of written frames (jpg or png)
    #[arg(long, default_value = "jpg")]
    format: ImageFormat,

    /// Weight of the mask colors blended over each frame
    #[arg(long, default_value_t = DEFAULT_BLEND_WEIGHT)]
    blend_weight: f32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// One command-line point prompt
#[derive(Debug, Clone, PartialEq)]
struct PromptArg {
    /// `None` means "whatever object is already under the point"
    object_id: Option<ObjectId>,
    frame_idx: usize,
    point: Point,
    label: PointLabel,
}

impl FromStr for PromptArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').map(str::trim).collect();
        let [object, frame, x, y, label] = fields.as_slice() else {
            bail!("expected OBJECT:FRAME:X:Y:(+|-), got {s:?}");
        };

        let object_id = match *object {
            "?" => None,
            id => Some(id.parse().with_context(|| format!("bad object id {id:?}"))?),
        };
        let label = match *label {
            "+" | "pos" => PointLabel::Positive,
            "-" | "neg" => PointLabel::Negative,
            other => bail!("bad label {other:?}, expected + or -"),
        };

        Ok(Self {
            object_id,
            frame_idx: frame.parse().context("bad frame index")?,
            point: Point::new(x.parse().context("bad x")?, y.parse().context("bad y")?),
            label,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("maskprop starting");
    tracing::info!("Video: {}", args.video.display());
    tracing::info!("Prompts: {}", args.prompts.len());

    let frames = source::load_frames(&args.video).context("Failed to load video")?;

    tracing::info!("Loading mask oracle");
    let oracle = oracle::create_default_oracle(&args.encoder, &args.decoder)
        .context("Failed to load mask oracle")?;

    let compositor = Compositor::new(Palette::default(), args.blend_weight)?;
    let mut cache = PropagationCache::with_compositor(oracle, frames, compositor)?;

    let target = propagation_target(args.until, cache.len())?;

    apply_prompts(&mut cache, &args.prompts)?;
    run_propagation(&mut cache, target)?;

    let mut sink = FrameDirectory::create(&args.output, args.format)
        .context("Failed to open output directory")?;
    let written = cache
        .save_cached_frames(&mut sink)
        .context("Failed to save frames")?;

    tracing::info!("Wrote {} frames to {}", written, args.output.display());
    Ok(())
}

fn apply_prompts<O: MaskOracle>(cache: &mut PropagationCache<O>, prompts: &[PromptArg]) -> Result<()> {
    if prompts.is_empty() {
        tracing::warn!("No prompts given; nothing will be tracked");
    }

    for prompt in prompts {
        let object_id = match prompt.object_id {
            Some(id) => id,
            None => {
                cache.propagate_until(prompt.frame_idx)?;
                match cache.object_at(prompt.point, prompt.frame_idx)? {
                    Some(id) => id,
                    None => {
                        tracing::warn!(
                            "No object at ({}, {}) on frame {}; skipping prompt",
                            prompt.point.x,
                            prompt.point.y,
                            prompt.frame_idx
                        );
                        continue;
                    }
                }
            }
        };

        let start = Instant::now();
        cache
            .add_prompt(object_id, prompt.frame_idx, &[prompt.point], &[prompt.label])
            .with_context(|| format!("Failed to add prompt {prompt:?}"))?;

        tracing::info!(
            "Object {} {:?} prompt on frame {}: {:.1}ms",
            object_id,
            prompt.label,
            prompt.frame_idx,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

/// Last frame to propagate through, checked before any oracle work
fn propagation_target(until: Option<usize>, len: usize) -> Result<usize> {
    let last = len.saturating_sub(1);
    match until {
        Some(frame) if frame > last => {
            bail!("--until {} is past the last frame {}", frame, last)
        }
        Some(frame) => Ok(frame),
        None => Ok(last),
    }
}

fn run_propagation<O: MaskOracle>(cache: &mut PropagationCache<O>, target: usize) -> Result<()> {
    tracing::info!("Propagating through frame {}", target);
    let start = Instant::now();
    let mut current = 0;
    cache.propagate_until(current)?;

    while current < target {
        current = cache.propagate_next(current)?.unwrap_or(current + 1);

        // Log stats every 30 frames
        if current % 30 == 0 {
            let avg_ms = start.elapsed().as_secs_f64() * 1000.0 / (current + 1) as f64;
            tracing::info!(
                "Frame {}/{}: {:.1}ms per frame, fps={:.1}",
                current,
                target,
                avg_ms,
                1000.0 / avg_ms
            );
        }
    }

    tracing::info!(
        "Propagation finished in {:.1}s, frontier {:?}",
        start.elapsed().as_secs_f64(),
        cache.frontier()
    );
    Ok(())
}
