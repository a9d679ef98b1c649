mod directory;

pub use directory::{FrameDirectory, ImageFormat};

use crate::error::Result;
use image::RgbImage;

/// Trait for destinations of rendered frames
pub trait OutputSink {
    /// Write the frame with the given index
    fn write_frame(&mut self, frame_idx: usize, frame: &RgbImage) -> Result<()>;
}
