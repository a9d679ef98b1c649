use std::path::PathBuf;

use crate::oracle::ObjectId;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("frame index {index} out of range for video of {len} frames")]
    InvalidFrameIndex { index: usize, len: usize },

    #[error("invalid video source {}: {reason}", .path.display())]
    InvalidVideoSource { path: PathBuf, reason: String },

    #[error("object ids must be positive")]
    InvalidObjectId,

    #[error("prompt has {points} points but {labels} labels")]
    PromptMismatch { points: usize, labels: usize },

    #[error("point ({x}, {y}) outside {width}x{height} frame")]
    PointOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },

    #[error("logits for object {object_id} have shape {actual:?}, expected {expected:?}")]
    LogitShape {
        object_id: ObjectId,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("mask oracle yielded frame {actual}, expected {expected}")]
    UnexpectedFrame { expected: usize, actual: usize },

    #[error("mask oracle yielded {received} frames, {requested} requested")]
    PropagationLength { requested: usize, received: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("mask oracle failed: {0:#}")]
    Oracle(anyhow::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub(crate) fn invalid_source(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidVideoSource {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
