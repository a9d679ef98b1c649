use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::RgbImage;

use super::FrameSource;
use crate::error::{Result, TrackerError};

/// A video container decoded through an ffmpeg subprocess
pub struct VideoFile {
    path: PathBuf,
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

fn locate(binary: &str) -> PathBuf {
    which::which(binary).unwrap_or_else(|_| PathBuf::from(binary))
}

impl VideoFile {
    /// Create a decoder for `path`, searching for ffmpeg and ffprobe in PATH
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ffmpeg_path: locate("ffmpeg"),
            ffprobe_path: locate("ffprobe"),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> TrackerError {
        TrackerError::invalid_source(&self.path, reason)
    }

    /// Width and height of the first video stream
    fn probe_dimensions(&self) -> Result<(u32, u32)> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=p=0:s=x",
            ])
            .arg(&self.path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.invalid(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(self.invalid(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_dimensions(&text).ok_or_else(|| self.invalid("no video stream found"))
    }
}

/// Parse ffprobe's `WIDTHxHEIGHT` line
///
/// Only the first two fields count; streams with side data get a trailing
/// separator.
fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split('x').map(str::trim).filter(|f| !f.is_empty());
    let width = fields.next()?.parse().ok()?;
    let height = fields.next()?.parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Cut packed rgb24 video into frames; a trailing partial frame is dropped
fn split_frames(bytes: Vec<u8>, width: u32, height: u32) -> Vec<RgbImage> {
    let frame_len = width as usize * height as usize * 3;
    bytes
        .chunks_exact(frame_len)
        .filter_map(|chunk| RgbImage::from_raw(width, height, chunk.to_vec()))
        .collect()
}

impl FrameSource for VideoFile {
    fn read_frames(&mut self) -> Result<Vec<RgbImage>> {
        let _span = tracing::debug_span!("decode_video").entered();

        let (width, height) = self.probe_dimensions()?;
        tracing::info!(
            "Decoding {} ({}x{}) with {}",
            self.path.display(),
            width,
            height,
            self.ffmpeg_path.display()
        );

        let output = Command::new(&self.ffmpeg_path)
            // Keep the stored orientation so frames match the probed size
            .args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .arg(&self.path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.invalid(format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(self.invalid(format!(
                "ffmpeg failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let frames = split_frames(output.stdout, width, height);
        tracing::debug!("Decoded {} frames", frames.len());
        Ok(frames)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("\n 640x480 \n"), Some((640, 480)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("0x480"), None);
        assert_eq!(parse_dimensions("N/A"), None);
        assert_eq!(parse_dimensions("1920"), None);
    }

    #[test]
    fn test_parse_dimensions_trailing_separator() {
        assert_eq!(parse_dimensions("1920x1080x\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("1080x1920x\n\n"), Some((1080, 1920)));
    }

    #[test]
    fn test_split_frames_drops_partial_tail() {
        let mut bytes = vec![1u8; 2 * 2 * 3];
        bytes.extend(vec![2u8; 2 * 2 * 3]);
        bytes.extend(vec![3u8; 5]);

        let frames = split_frames(bytes, 2, 2);
        assert_eq!(frames.len(), 2);
        assert_eq!(*frames[1].get_pixel(1, 1), image::Rgb([2, 2, 2]));
    }
}
