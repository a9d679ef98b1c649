use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;

use super::FrameSource;
use crate::error::{Result, TrackerError};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A directory of still images, one frame per file, in file name order
pub struct ImageFolder {
    dir: PathBuf,
}

impl ImageFolder {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Image files in the folder, sorted lexically by name
    pub fn image_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| TrackerError::invalid_source(&self.dir, e.to_string()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    IMAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(paths)
    }
}

impl FrameSource for ImageFolder {
    fn read_frames(&mut self) -> Result<Vec<RgbImage>> {
        let _span = tracing::debug_span!("read_folder").entered();

        let paths = self.image_paths()?;
        tracing::debug!("Found {} images in {}", paths.len(), self.dir.display());

        paths
            .iter()
            .map(|path| {
                image::open(path)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| TrackerError::invalid_source(path, e.to_string()))
            })
            .collect()
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}
