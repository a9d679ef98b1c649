//! Deterministic oracle for exercising the cache without a model

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::Array2;

use super::types::{FrameMasks, LogitMap, MaskOracle, ObjectId, Point, PointLabel, Propagation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init { frames: usize },
    AddPrompt { frame_idx: usize, object_id: ObjectId },
    Propagate { start_frame_idx: usize, num_frames: usize },
    Reset,
}

/// Axis-aligned box an object occupies on every frame, half-open
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

#[derive(Default)]
pub struct ScriptedOracle {
    pub calls: Vec<Call>,
    /// Frames actually yielded by propagation, in order
    pub yielded: Vec<usize>,
    regions: BTreeMap<ObjectId, Region>,
    fail_at: Option<usize>,
    skip_frame: Option<usize>,
}

pub struct ScriptedState {
    width: usize,
    height: usize,
    len: usize,
    first_prompt: BTreeMap<ObjectId, usize>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, object_id: ObjectId, region: Region) -> Self {
        self.regions.insert(object_id, region);
        self
    }

    /// Make propagation fail when it reaches `frame_idx`
    pub fn fail_at(&mut self, frame_idx: Option<usize>) {
        self.fail_at = frame_idx;
    }

    /// Make propagation silently leave out `frame_idx`
    pub fn skip_frame(&mut self, frame_idx: Option<usize>) {
        self.skip_frame = frame_idx;
    }

    pub fn propagate_calls(&self) -> Vec<(usize, usize)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Propagate {
                    start_frame_idx,
                    num_frames,
                } => Some((*start_frame_idx, *num_frames)),
                _ => None,
            })
            .collect()
    }

    fn logits(&self, state: &ScriptedState, object_id: ObjectId) -> LogitMap {
        let region = self.regions.get(&object_id).copied().unwrap_or(Region {
            x0: 0,
            y0: 0,
            x1: 1,
            y1: 1,
        });
        Array2::from_shape_fn((state.height, state.width), |(y, x)| {
            if (region.x0..region.x1).contains(&x) && (region.y0..region.y1).contains(&y) {
                1.0
            } else {
                -1.0
            }
        })
    }

    fn frame(&self, state: &ScriptedState, frame_idx: usize) -> FrameMasks {
        let objects = state
            .first_prompt
            .iter()
            .filter(|(_, first)| **first <= frame_idx)
            .map(|(&id, _)| (id, self.logits(state, id)))
            .collect();
        FrameMasks { frame_idx, objects }
    }
}

impl MaskOracle for ScriptedOracle {
    type State = ScriptedState;

    fn init(&mut self, frames: Arc<[RgbImage]>) -> Result<ScriptedState> {
        self.calls.push(Call::Init {
            frames: frames.len(),
        });
        let (width, height) = frames
            .first()
            .map(|f| f.dimensions())
            .ok_or_else(|| anyhow!("no frames"))?;
        Ok(ScriptedState {
            width: width as usize,
            height: height as usize,
            len: frames.len(),
            first_prompt: BTreeMap::new(),
        })
    }

    fn add_prompt(
        &mut self,
        state: &mut ScriptedState,
        frame_idx: usize,
        object_id: ObjectId,
        _points: &[Point],
        _labels: &[PointLabel],
    ) -> Result<FrameMasks> {
        self.calls.push(Call::AddPrompt {
            frame_idx,
            object_id,
        });
        let first = state.first_prompt.entry(object_id).or_insert(frame_idx);
        *first = (*first).min(frame_idx);
        Ok(self.frame(state, frame_idx))
    }

    fn propagate<'a>(
        &'a mut self,
        state: &'a mut ScriptedState,
        start_frame_idx: usize,
        num_frames: usize,
    ) -> Result<Propagation<'a>> {
        self.calls.push(Call::Propagate {
            start_frame_idx,
            num_frames,
        });
        let end = (start_frame_idx + num_frames).min(state.len);

        let mut results = Vec::new();
        for frame_idx in start_frame_idx..end {
            if self.skip_frame == Some(frame_idx) {
                continue;
            }
            if self.fail_at == Some(frame_idx) {
                results.push(Err(anyhow!("scripted failure at frame {frame_idx}")));
                break;
            }
            self.yielded.push(frame_idx);
            results.push(Ok(self.frame(state, frame_idx)));
        }
        Ok(Box::new(results.into_iter()))
    }

    fn reset(&mut self, state: &mut ScriptedState) -> Result<()> {
        self.calls.push(Call::Reset);
        state.first_prompt.clear();
        Ok(())
    }
}

/// Solid-color frames, each with a distinct gray level
pub fn gray_frames(count: usize, width: u32, height: u32) -> Arc<[RgbImage]> {
    (0..count)
        .map(|i| RgbImage::from_pixel(width, height, image::Rgb([(i * 10) as u8; 3])))
        .collect()
}
