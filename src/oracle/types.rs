use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use ndarray::Array2;

/// User-assigned identifier of a tracked object (positive)
pub type ObjectId = u32;

/// Per-pixel mask logits shaped (height, width); positive means "inside"
pub type LogitMap = Array2<f32>;

/// Thresholded logits, same shape as the frame
pub type BinaryMask = Array2<bool>;

/// A point prompt in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Whether a point marks the object or excludes a region from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointLabel {
    Positive,
    Negative,
}

impl PointLabel {
    /// Label value in the encoding the SAM decoder expects
    pub fn as_f32(self) -> f32 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => 0.0,
        }
    }
}

/// Oracle output for a single frame, one logit map per object
#[derive(Debug, Clone)]
pub struct FrameMasks {
    pub frame_idx: usize,
    pub objects: Vec<(ObjectId, LogitMap)>,
}

/// Lazy, finite sequence of per-frame results in increasing frame order
pub type Propagation<'a> = Box<dyn Iterator<Item = Result<FrameMasks>> + 'a>;

/// Trait for stateful video mask predictors
///
/// All tracking memory lives in `State`, which the caller owns and hands back
/// on every call. The predictor must see frames strictly in increasing order
/// with no gaps; the propagation cache is the only caller and enforces that.
pub trait MaskOracle {
    /// Opaque tracking memory for one loaded video
    type State;

    /// Build fresh tracking state for a video
    fn init(&mut self, frames: Arc<[RgbImage]>) -> Result<Self::State>;

    /// Register a prompt for `object_id` on `frame_idx`
    ///
    /// # Returns
    /// * Logits for that frame only, covering the prompted object and any
    ///   other object already tracked there
    fn add_prompt(
        &mut self,
        state: &mut Self::State,
        frame_idx: usize,
        object_id: ObjectId,
        points: &[Point],
        labels: &[PointLabel],
    ) -> Result<FrameMasks>;

    /// Track forward over `num_frames` frames starting at `start_frame_idx`
    ///
    /// The returned sequence yields one entry per frame in strictly increasing
    /// order. It cannot be resumed; a new call is needed to re-derive frames.
    fn propagate<'a>(
        &'a mut self,
        state: &'a mut Self::State,
        start_frame_idx: usize,
        num_frames: usize,
    ) -> Result<Propagation<'a>>;

    /// Drop all tracking memory; frames survive
    fn reset(&mut self, state: &mut Self::State) -> Result<()>;
}
