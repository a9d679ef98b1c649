use image::{Rgb, RgbImage};

use super::palette::Palette;
use crate::error::{Result, TrackerError};
use crate::oracle::{BinaryMask, FrameMasks, ObjectId};

/// Weight of the colored canvas when blended over the raw frame
pub const DEFAULT_BLEND_WEIGHT: f32 = 0.6;

/// A frame's oracle output turned into display and hit-test data
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub frame_idx: usize,
    /// Objects painted on black, last object wins on overlap
    pub canvas: RgbImage,
    /// Raw frame with the canvas blended on top
    pub overlay: RgbImage,
    /// Thresholded masks in oracle order
    pub masks: Vec<(ObjectId, BinaryMask)>,
}

/// Merges per-object logits into a single colored overlay
#[derive(Debug, Clone)]
pub struct Compositor {
    palette: Palette,
    blend_weight: f32,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            blend_weight: DEFAULT_BLEND_WEIGHT,
        }
    }
}

impl Compositor {
    pub fn new(palette: Palette, blend_weight: f32) -> Result<Self> {
        if !blend_weight.is_finite() || blend_weight < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "blend weight must be a non-negative number, got {blend_weight}"
            )));
        }
        Ok(Self {
            palette,
            blend_weight,
        })
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Threshold each object's logits at zero and paint them in list order
    ///
    /// Fails without side effects if any logit map does not match the raw
    /// frame's resolution.
    pub fn merge(&self, raw: &RgbImage, frame: FrameMasks) -> Result<RenderedFrame> {
        let _span = tracing::debug_span!("merge", frame = frame.frame_idx).entered();

        let (width, height) = raw.dimensions();
        let expected = (height as usize, width as usize);

        let mut canvas = RgbImage::new(width, height);
        let mut masks = Vec::with_capacity(frame.objects.len());

        for (object_id, logits) in frame.objects {
            if logits.dim() != expected {
                return Err(TrackerError::LogitShape {
                    object_id,
                    expected,
                    actual: logits.dim(),
                });
            }

            let mask = logits.mapv(|v| v > 0.0);
            let color = self.palette.color(object_id);
            for ((y, x), &inside) in mask.indexed_iter() {
                if inside {
                    canvas.put_pixel(x as u32, y as u32, color);
                }
            }
            masks.push((object_id, mask));
        }

        tracing::debug!(
            "Merged {} objects on frame {}",
            masks.len(),
            frame.frame_idx
        );

        let overlay = self.blend(raw, &canvas);
        Ok(RenderedFrame {
            frame_idx: frame.frame_idx,
            canvas,
            overlay,
            masks,
        })
    }

    /// `raw * 1 + canvas * weight`, rounded and saturated per channel
    pub fn blend(&self, raw: &RgbImage, canvas: &RgbImage) -> RgbImage {
        let weight = self.blend_weight;
        RgbImage::from_fn(raw.width(), raw.height(), |x, y| {
            let base = raw.get_pixel(x, y);
            let paint = canvas.get_pixel(x, y);
            Rgb(std::array::from_fn(|c| {
                (base[c] as f32 + paint[c] as f32 * weight)
                    .round()
                    .clamp(0.0, 255.0) as u8
            }))
        })
    }
}
