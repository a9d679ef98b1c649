use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use ndarray::{s, Array1, Array2, Array3, Array4, Axis, Ix2, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::environment::Environment;
use ort::session::Session;
use ort::value::TensorRef;

use super::preprocess::Preprocessor;
use super::types::{FrameMasks, MaskOracle, ObjectId, Point, PointLabel, Propagation};

/// Label the decoder treats as "no point" when an object has no prompt on a frame
const PADDING_LABEL: f32 = -1.0;

/// SAM-style point-prompted mask predictor running on ONNX Runtime
///
/// The model is split in two graphs: an image encoder run once per frame, and
/// a prompt decoder run once per object. Temporal consistency comes from
/// feeding each object's low resolution logits from the previous frame back
/// in as the decoder's mask input.
pub struct SamOnnxOracle {
    encoder: Session,
    decoder: Session,
    preprocessor: Preprocessor,
}

/// Encoder outputs for one frame
struct FrameEmbedding {
    image_embed: Array4<f32>,
    high_res_feats_0: Array4<f32>,
    high_res_feats_1: Array4<f32>,
}

/// Tracking memory for one object
#[derive(Default)]
struct ObjectTrack {
    /// Accumulated prompts keyed by frame
    prompts: BTreeMap<usize, (Vec<Point>, Vec<PointLabel>)>,
    /// Low resolution logits per decoded frame
    memory: BTreeMap<usize, Array2<f32>>,
}

impl ObjectTrack {
    /// Logits to feed back when decoding `frame_idx`
    ///
    /// A refinement on an already decoded frame reuses that frame's logits,
    /// otherwise the previous frame's are used.
    fn mask_memory(&self, frame_idx: usize) -> Option<&Array2<f32>> {
        self.memory.get(&frame_idx).or_else(|| {
            frame_idx
                .checked_sub(1)
                .and_then(|previous| self.memory.get(&previous))
        })
    }

    /// Store logits for `frame_idx`; later frames are stale once it changes
    fn remember(&mut self, frame_idx: usize, low_res: Array2<f32>) {
        self.memory.retain(|&index, _| index < frame_idx);
        self.memory.insert(frame_idx, low_res);
    }

    fn is_tracked_at(&self, frame_idx: usize) -> bool {
        self.prompts
            .keys()
            .next()
            .is_some_and(|&first| first <= frame_idx)
    }
}

/// Per-video state handed back to the oracle on every call
pub struct SamTrackState {
    frames: Arc<[RgbImage]>,
    objects: BTreeMap<ObjectId, ObjectTrack>,
    embedding: Option<(usize, FrameEmbedding)>,
}

/// Process-wide ONNX Runtime environment (ort allows only one per process)
fn ort_environment() -> Result<Environment> {
    static ENV: Mutex<Option<Environment>> = Mutex::new(None);
    let mut guard = ENV.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(env) = guard.as_ref() {
        return Ok(env.clone());
    }
    let env = ort::init().build().map_err(|e| anyhow!("{e}"))?;
    *guard = Some(env.clone());
    Ok(env)
}

fn load_session(path: &Path) -> Result<Session> {
    tracing::info!("Loading ONNX graph from {}", path.display());

    Session::builder(&ort_environment()?)
        .map_err(|e| anyhow!("{e}"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| anyhow!("{e}"))?
        .with_intra_threads(4)
        .map_err(|e| anyhow!("{e}"))?
        .commit_from_file(path)
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("Failed to load model from {}", path.display()))
}

impl SamOnnxOracle {
    /// Create a predictor from exported encoder and decoder graphs
    ///
    /// # Default Configuration
    /// - Encoder input: 1024x1024
    /// - Decoder mask input: 256x256 (a quarter of the encoder input)
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(encoder_path: P, decoder_path: Q) -> Result<Self> {
        let encoder = load_session(encoder_path.as_ref())?;
        let decoder = load_session(decoder_path.as_ref())?;

        tracing::info!("SAM encoder and decoder loaded successfully");

        Ok(Self {
            encoder,
            decoder,
            preprocessor: Preprocessor::new(1024),
        })
    }

    fn mask_input_size(&self) -> usize {
        self.preprocessor.input_size() as usize / 4
    }

    /// Make sure the state holds the encoder outputs for `frame_idx`
    fn ensure_embedding(&mut self, state: &mut SamTrackState, frame_idx: usize) -> Result<()> {
        if matches!(state.embedding, Some((idx, _)) if idx == frame_idx) {
            return Ok(());
        }

        let _span = tracing::debug_span!("encode", frame = frame_idx).entered();

        let frame = state
            .frames
            .get(frame_idx)
            .with_context(|| format!("Frame {frame_idx} not in video"))?;
        let input = self.preprocessor.preprocess(frame)?;

        let outputs = self
            .encoder
            .run(ort::inputs![TensorRef::from_array_view(&input)?])
            .context("Failed to run image encoder")?;

        // Encoder outputs: high_res_feats_0, high_res_feats_1, image_embed
        let extract = |i: usize| -> Result<Array4<f32>> {
            Ok(outputs[i]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix4>()?)
        };
        let embedding = FrameEmbedding {
            high_res_feats_0: extract(0)?,
            high_res_feats_1: extract(1)?,
            image_embed: extract(2)?,
        };

        state.embedding = Some((frame_idx, embedding));
        Ok(())
    }

    /// Run the prompt decoder for one object, updating its memory
    fn decode_object(
        &mut self,
        embedding: &FrameEmbedding,
        track: &mut ObjectTrack,
        frame_idx: usize,
        frame_size: (u32, u32),
    ) -> Result<Array2<f32>> {
        let (width, height) = frame_size;

        let (coords, labels) = match track.prompts.get(&frame_idx) {
            Some((points, labels)) => (
                self.preprocessor.scale_points(points, width, height),
                Array2::from_shape_fn((1, labels.len()), |(_, i)| labels[i].as_f32()),
            ),
            None => (
                Array3::<f32>::zeros((1, 1, 2)),
                Array2::from_elem((1, 1), PADDING_LABEL),
            ),
        };

        let size = self.mask_input_size();
        let (mask_input, has_mask_input) = match track.mask_memory(frame_idx) {
            Some(low_res) if low_res.dim() == (size, size) => (
                low_res.view().insert_axis(Axis(0)).insert_axis(Axis(0)).to_owned(),
                Array1::from_elem(1, 1.0f32),
            ),
            _ => (Array4::<f32>::zeros((1, 1, size, size)), Array1::from_elem(1, 0.0f32)),
        };

        let outputs = self
            .decoder
            .run(ort::inputs![
                TensorRef::from_array_view(&embedding.image_embed)?,
                TensorRef::from_array_view(&embedding.high_res_feats_0)?,
                TensorRef::from_array_view(&embedding.high_res_feats_1)?,
                TensorRef::from_array_view(&coords)?,
                TensorRef::from_array_view(&labels)?,
                TensorRef::from_array_view(&mask_input)?,
                TensorRef::from_array_view(&has_mask_input)?
            ])
            .context("Failed to run prompt decoder")?;

        // Decoder outputs: masks [1, K, h, w] low resolution logits, iou [1, K]
        let masks = outputs[0].try_extract_array::<f32>()?;
        let iou = outputs[1].try_extract_array::<f32>()?;
        if masks.ndim() != 4 || masks.shape()[1] == 0 {
            bail!("Unexpected decoder mask shape {:?}", masks.shape());
        }

        let best = iou
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i)
            .min(masks.shape()[1] - 1);
        let low_res = masks
            .slice(s![0, best, .., ..])
            .to_owned()
            .into_dimensionality::<Ix2>()?;

        let logits = Preprocessor::postprocess_logits(low_res.view(), width, height);
        track.remember(frame_idx, low_res);
        Ok(logits)
    }

    /// Decode every object tracked at `frame_idx`
    fn track_frame(&mut self, state: &mut SamTrackState, frame_idx: usize) -> Result<FrameMasks> {
        let _span = tracing::debug_span!("track_frame", frame = frame_idx).entered();

        self.ensure_embedding(state, frame_idx)?;

        let SamTrackState {
            frames,
            objects,
            embedding,
        } = state;
        let (_, embedding) = embedding
            .as_ref()
            .context("Frame embedding missing after encode")?;
        let frame_size = frames[frame_idx].dimensions();

        let mut results = Vec::new();
        for (&object_id, track) in objects.iter_mut() {
            if !track.is_tracked_at(frame_idx) {
                continue;
            }
            let logits = self.decode_object(embedding, track, frame_idx, frame_size)?;
            results.push((object_id, logits));
        }

        Ok(FrameMasks {
            frame_idx,
            objects: results,
        })
    }
}

impl MaskOracle for SamOnnxOracle {
    type State = SamTrackState;

    fn init(&mut self, frames: Arc<[RgbImage]>) -> Result<SamTrackState> {
        tracing::info!("Initializing tracking state for {} frames", frames.len());
        Ok(SamTrackState {
            frames,
            objects: BTreeMap::new(),
            embedding: None,
        })
    }

    fn add_prompt(
        &mut self,
        state: &mut SamTrackState,
        frame_idx: usize,
        object_id: ObjectId,
        points: &[Point],
        labels: &[PointLabel],
    ) -> Result<FrameMasks> {
        if frame_idx >= state.frames.len() {
            bail!("Frame {frame_idx} not in video of {} frames", state.frames.len());
        }

        let (prompt_points, prompt_labels) = state
            .objects
            .entry(object_id)
            .or_default()
            .prompts
            .entry(frame_idx)
            .or_default();
        prompt_points.extend_from_slice(points);
        prompt_labels.extend_from_slice(labels);

        self.track_frame(state, frame_idx)
    }

    fn propagate<'a>(
        &'a mut self,
        state: &'a mut SamTrackState,
        start_frame_idx: usize,
        num_frames: usize,
    ) -> Result<Propagation<'a>> {
        let end = start_frame_idx
            .saturating_add(num_frames)
            .min(state.frames.len());
        tracing::debug!("Propagating frames {}..{}", start_frame_idx, end);

        Ok(Box::new(SamPropagation {
            oracle: self,
            state,
            next: start_frame_idx,
            end,
        }))
    }

    fn reset(&mut self, state: &mut SamTrackState) -> Result<()> {
        tracing::info!("Resetting SAM tracking state");
        state.objects.clear();
        state.embedding = None;
        Ok(())
    }
}

/// Lazy forward tracking over a frame range
struct SamPropagation<'a> {
    oracle: &'a mut SamOnnxOracle,
    state: &'a mut SamTrackState,
    next: usize,
    end: usize,
}

impl Iterator for SamPropagation<'_> {
    type Item = Result<FrameMasks>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let frame_idx = self.next;
        self.next += 1;
        Some(self.oracle.track_frame(self.state, frame_idx))
    }
}
