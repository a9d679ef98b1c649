mod folder;
mod video;

pub use folder::ImageFolder;
pub use video::VideoFile;

use std::path::Path;
use std::sync::Arc;

use image::RgbImage;

use crate::error::{Result, TrackerError};

/// Trait for ordered, finite sources of video frames
pub trait FrameSource {
    /// Decode every frame in presentation order
    fn read_frames(&mut self) -> Result<Vec<RgbImage>>;

    /// Where the frames come from
    fn path(&self) -> &Path;
}

/// Pick a source for `path`: a directory of stills or a video container
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        Ok(Box::new(ImageFolder::new(path)))
    } else if path.is_file() {
        Ok(Box::new(VideoFile::new(path)))
    } else {
        Err(TrackerError::invalid_source(
            path,
            "neither a directory nor a readable file",
        ))
    }
}

/// Load all frames from `path`, checking they form a usable video
pub fn load_frames(path: &Path) -> Result<Arc<[RgbImage]>> {
    let mut source = open_source(path)?;
    let frames = source.read_frames()?;

    let first = frames
        .first()
        .ok_or_else(|| TrackerError::invalid_source(path, "no frames found"))?;
    let dims = first.dimensions();
    if let Some((i, frame)) = frames
        .iter()
        .enumerate()
        .find(|(_, f)| f.dimensions() != dims)
    {
        return Err(TrackerError::invalid_source(
            path,
            format!(
                "frame {} is {}x{}, expected {}x{}",
                i,
                frame.width(),
                frame.height(),
                dims.0,
                dims.1
            ),
        ));
    }

    tracing::info!(
        "Loaded {} frames ({}x{}) from {}",
        frames.len(),
        dims.0,
        dims.1,
        source.path().display()
    );
    Ok(frames.into())
}
