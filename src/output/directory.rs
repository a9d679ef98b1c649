use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::RgbImage;

use super::OutputSink;
use crate::error::{Result, TrackerError};

/// Raster format for persisted frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    fn as_image_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(TrackerError::InvalidConfig(format!(
                "unsupported image format {other:?}"
            ))),
        }
    }
}

/// Writes frames as `frame_0000.<ext>`, `frame_0001.<ext>`, ... into a directory
pub struct FrameDirectory {
    dir: PathBuf,
    format: ImageFormat,
    written: usize,
}

impl FrameDirectory {
    /// Open (creating if needed) the target directory
    pub fn create<P: AsRef<Path>>(dir: P, format: ImageFormat) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        tracing::info!("Writing {} frames to {}", format.extension(), dir.display());

        Ok(Self {
            dir,
            format,
            written: 0,
        })
    }

    pub fn frame_path(&self, frame_idx: usize) -> PathBuf {
        self.dir
            .join(format!("frame_{:04}.{}", frame_idx, self.format.extension()))
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl OutputSink for FrameDirectory {
    fn write_frame(&mut self, frame_idx: usize, frame: &RgbImage) -> Result<()> {
        let path = self.frame_path(frame_idx);
        frame.save_with_format(&path, self.format.as_image_format())?;
        tracing::debug!("Wrote {}", path.display());
        self.written += 1;
        Ok(())
    }
}
