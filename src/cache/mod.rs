//! Incremental propagation cache in front of a stateful mask oracle
//!
//! The cache owns the oracle's tracking state and is the only code that calls
//! into it. Every call goes out in increasing frame order: before a prompt on
//! frame `k` reaches the oracle, frames `..k` are propagated first, and
//! propagation always resumes at `frontier + 1`.
//!
//! Oracle output is rendered in full before anything is committed, so a
//! failed call leaves the frontier and every cache exactly as it was.

mod store;

pub use store::MaskStore;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use image::RgbImage;

use crate::error::{Result, TrackerError};
use crate::oracle::{FrameMasks, MaskOracle, ObjectId, Point, PointLabel};
use crate::output::OutputSink;
use crate::overlay::{Compositor, RenderedFrame};

pub struct PropagationCache<O: MaskOracle> {
    oracle: O,
    state: O::State,
    frames: Arc<[RgbImage]>,
    compositor: Compositor,
    /// Latest overlay per frame, from either a prompt or propagation
    overlays: BTreeMap<usize, RgbImage>,
    /// Overlays produced by propagation only; unreached frames show raw
    tracked: BTreeMap<usize, RgbImage>,
    masks: MaskStore,
    anchors: BTreeSet<usize>,
    /// Highest propagated frame, `None` before any
    frontier: Option<usize>,
}

// Construction rejects empty videos, so there is no `is_empty`
#[allow(clippy::len_without_is_empty)]
impl<O: MaskOracle> PropagationCache<O> {
    pub fn new(oracle: O, frames: Arc<[RgbImage]>) -> Result<Self> {
        Self::with_compositor(oracle, frames, Compositor::default())
    }

    pub fn with_compositor(
        mut oracle: O,
        frames: Arc<[RgbImage]>,
        compositor: Compositor,
    ) -> Result<Self> {
        if frames.is_empty() {
            return Err(TrackerError::InvalidConfig("video has no frames".into()));
        }

        let state = oracle
            .init(Arc::clone(&frames))
            .map_err(TrackerError::Oracle)?;

        tracing::info!(
            "Propagation cache ready for {} frames ({}x{})",
            frames.len(),
            frames[0].width(),
            frames[0].height()
        );

        Ok(Self {
            oracle,
            state,
            frames,
            compositor,
            overlays: BTreeMap::new(),
            tracked: BTreeMap::new(),
            masks: MaskStore::new(),
            anchors: BTreeSet::new(),
            frontier: None,
        })
    }

    /// Number of frames; never zero
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// (width, height) shared by every frame
    pub fn dimensions(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }

    pub fn frontier(&self) -> Option<usize> {
        self.frontier
    }

    pub fn anchored_frames(&self) -> &BTreeSet<usize> {
        &self.anchors
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.frames.len() {
            Ok(())
        } else {
            Err(TrackerError::InvalidFrameIndex {
                index,
                len: self.frames.len(),
            })
        }
    }

    fn check_point(&self, point: Point) -> Result<()> {
        let (width, height) = self.dimensions();
        if point.x < width && point.y < height {
            Ok(())
        } else {
            Err(TrackerError::PointOutOfBounds {
                x: point.x,
                y: point.y,
                width,
                height,
            })
        }
    }

    pub fn raw_frame(&self, index: usize) -> Result<&RgbImage> {
        self.check_index(index)?;
        Ok(&self.frames[index])
    }

    /// Overlay from the last prompt or propagation touching this frame
    pub fn cached_frame(&self, index: usize) -> Result<Option<&RgbImage>> {
        self.check_index(index)?;
        Ok(self.overlays.get(&index))
    }

    /// Tracking result view: the propagated overlay, or the raw frame
    pub fn tracked_frame(&self, index: usize) -> Result<&RgbImage> {
        self.check_index(index)?;
        Ok(self.tracked.get(&index).unwrap_or(&self.frames[index]))
    }

    /// Whether propagation has produced an overlay for this frame
    pub fn is_tracked(&self, index: usize) -> Result<bool> {
        self.check_index(index)?;
        Ok(self.tracked.contains_key(&index))
    }

    /// What an editor shows: the cached overlay, or the raw frame
    pub fn display_frame(&self, index: usize) -> Result<&RgbImage> {
        self.check_index(index)?;
        Ok(self.overlays.get(&index).unwrap_or(&self.frames[index]))
    }

    /// Add a point prompt for one object on one frame
    ///
    /// Frames before `frame_idx` are propagated first. The frontier then sits
    /// just before the prompted frame so the next propagation re-tracks it.
    /// A prompt at or before the frontier invalidates everything after it.
    ///
    /// # Returns
    /// * The prompted frame's new overlay
    pub fn add_prompt(
        &mut self,
        object_id: ObjectId,
        frame_idx: usize,
        points: &[Point],
        labels: &[PointLabel],
    ) -> Result<&RgbImage> {
        self.check_index(frame_idx)?;
        if object_id == 0 {
            return Err(TrackerError::InvalidObjectId);
        }
        if points.is_empty() || points.len() != labels.len() {
            return Err(TrackerError::PromptMismatch {
                points: points.len(),
                labels: labels.len(),
            });
        }
        for &point in points {
            self.check_point(point)?;
        }

        if let Some(previous) = frame_idx.checked_sub(1) {
            self.propagate_until(previous)?;
        }

        let result = {
            let _span =
                tracing::debug_span!("oracle_prompt", frame = frame_idx, object = object_id)
                    .entered();
            self.oracle
                .add_prompt(&mut self.state, frame_idx, object_id, points, labels)
                .map_err(TrackerError::Oracle)?
        };
        if result.frame_idx != frame_idx {
            return Err(TrackerError::UnexpectedFrame {
                expected: frame_idx,
                actual: result.frame_idx,
            });
        }
        let rendered = self.compositor.merge(&self.frames[frame_idx], result)?;

        if self.frontier.is_some_and(|f| f >= frame_idx) {
            self.invalidate_after_prompt(frame_idx);
        }
        self.anchors.insert(frame_idx);
        self.frontier = frame_idx.checked_sub(1);

        tracing::debug!(
            "Prompt for object {} on frame {}, frontier now {:?}",
            object_id,
            frame_idx,
            self.frontier
        );

        self.masks.record(frame_idx, rendered.masks);
        self.overlays.insert(frame_idx, rendered.overlay);
        Ok(&self.overlays[&frame_idx])
    }

    /// Drop results that a prompt on `frame_idx` makes stale
    fn invalidate_after_prompt(&mut self, frame_idx: usize) {
        tracing::info!(
            "Prompt on frame {} rewinds frontier from {:?}; invalidating later frames",
            frame_idx,
            self.frontier
        );
        self.overlays.retain(|&index, _| index <= frame_idx);
        self.tracked.retain(|&index, _| index < frame_idx);
        self.masks.truncate_after(frame_idx);
    }

    /// Propagate through `target_frame_idx` inclusive
    ///
    /// No-op until some frame holds a prompt, and once the frontier already
    /// covers the target.
    pub fn propagate_until(&mut self, target_frame_idx: usize) -> Result<()> {
        self.check_index(target_frame_idx)?;

        if self.anchors.is_empty() {
            tracing::debug!("No prompts yet; nothing to propagate");
            return Ok(());
        }
        if self.frontier.is_some_and(|f| target_frame_idx <= f) {
            return Ok(());
        }

        let start = self.frontier.map_or(0, |f| f + 1);
        let num_frames = target_frame_idx - start + 1;

        let _span =
            tracing::debug_span!("propagate", start = start, target = target_frame_idx).entered();

        let results: Vec<FrameMasks> = self
            .oracle
            .propagate(&mut self.state, start, num_frames)
            .and_then(|frames| frames.collect::<anyhow::Result<Vec<_>>>())
            .map_err(TrackerError::Oracle)?;

        if results.len() != num_frames {
            return Err(TrackerError::PropagationLength {
                requested: num_frames,
                received: results.len(),
            });
        }
        for (expected, frame) in (start..).zip(&results) {
            if frame.frame_idx != expected {
                return Err(TrackerError::UnexpectedFrame {
                    expected,
                    actual: frame.frame_idx,
                });
            }
        }

        let rendered = results
            .into_iter()
            .map(|frame| self.compositor.merge(&self.frames[frame.frame_idx], frame))
            .collect::<Result<Vec<RenderedFrame>>>()?;

        for frame in rendered {
            self.masks.record(frame.frame_idx, frame.masks);
            self.overlays.insert(frame.frame_idx, frame.overlay.clone());
            self.tracked.insert(frame.frame_idx, frame.overlay);
        }
        self.frontier = Some(target_frame_idx);

        tracing::debug!("Propagated frames {}..={}", start, target_frame_idx);
        Ok(())
    }

    /// Step one frame past `current_frame_idx`
    ///
    /// # Returns
    /// * The next frame index, or `None` at the last frame or when the next
    ///   frame is already propagated
    pub fn propagate_next(&mut self, current_frame_idx: usize) -> Result<Option<usize>> {
        self.check_index(current_frame_idx)?;
        self.propagate_until(current_frame_idx)?;

        let next = current_frame_idx + 1;
        if next < self.frames.len() && self.frontier.map_or(true, |f| next > f) {
            self.propagate_until(next)?;
            return Ok(Some(next));
        }
        Ok(None)
    }

    /// Object whose mask covers `point` on `frame_idx`, if any
    ///
    /// A frame with no stored masks has no object at any point, even one
    /// outside the frame.
    pub fn object_at(&self, point: Point, frame_idx: usize) -> Result<Option<ObjectId>> {
        self.check_index(frame_idx)?;
        if !self.masks.contains_frame(frame_idx) {
            return Ok(None);
        }
        self.check_point(point)?;
        Ok(self.masks.object_at(frame_idx, point))
    }

    /// Clear oracle memory and every cache
    pub fn reset(&mut self) -> Result<()> {
        self.oracle
            .reset(&mut self.state)
            .map_err(TrackerError::Oracle)?;

        self.overlays.clear();
        self.tracked.clear();
        self.masks.clear();
        self.anchors.clear();
        self.frontier = None;

        tracing::info!("Tracking state reset");
        Ok(())
    }

    /// Write every cached overlay, in frame order
    ///
    /// Returns the number of frames written.
    pub fn save_cached_frames(&self, sink: &mut dyn OutputSink) -> Result<usize> {
        for (&index, frame) in &self.overlays {
            sink.write_frame(index, frame)?;
        }
        tracing::info!("Saved {} cached frames", self.overlays.len());
        Ok(self.overlays.len())
    }
}
