use anyhow::Result;
use image::{imageops, RgbImage};
use ndarray::{Array2, Array3, Array4, ArrayView2};

use super::types::Point;

/// ImageNet statistics the SAM image encoder was trained with
const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGB frames and prompts into encoder/decoder inputs
pub struct Preprocessor {
    input_size: u32,
}

impl Preprocessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to a square of `input_size` (aspect ratio is not preserved)
    /// 2. Scale to [0, 1] and standardize per channel
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, input_size, input_size]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let size = self.input_size;
        let resized = if image.dimensions() != (size, size) {
            imageops::resize(image, size, size, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }

        Ok(tensor)
    }

    /// Map frame-space points into the encoder's input space
    ///
    /// Returns: Array3<f32> with shape [1, N, 2], (x, y) per point
    pub fn scale_points(&self, points: &[Point], frame_width: u32, frame_height: u32) -> Array3<f32> {
        let sx = self.input_size as f32 / frame_width as f32;
        let sy = self.input_size as f32 / frame_height as f32;

        let mut coords = Array3::<f32>::zeros((1, points.len(), 2));
        for (i, p) in points.iter().enumerate() {
            coords[[0, i, 0]] = p.x as f32 * sx;
            coords[[0, i, 1]] = p.y as f32 * sy;
        }
        coords
    }

    /// Upsample low resolution mask logits to the frame resolution
    ///
    /// Bilinear with half-pixel centers. Works on the raw logits so their
    /// sign survives; going through an 8-bit image would clamp it away.
    ///
    /// Returns: Array2<f32> with shape [target_height, target_width]
    pub fn postprocess_logits(
        logits: ArrayView2<f32>,
        target_width: u32,
        target_height: u32,
    ) -> Array2<f32> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (src_h, src_w) = logits.dim();
        let (dst_h, dst_w) = (target_height as usize, target_width as usize);
        if (src_h, src_w) == (dst_h, dst_w) {
            return logits.to_owned();
        }

        let scale_y = src_h as f32 / dst_h as f32;
        let scale_x = src_w as f32 / dst_w as f32;

        Array2::from_shape_fn((dst_h, dst_w), |(y, x)| {
            let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
            let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
            let (y0, x0) = (fy.floor() as usize, fx.floor() as usize);
            let (y1, x1) = ((y0 + 1).min(src_h - 1), (x0 + 1).min(src_w - 1));
            let (wy, wx) = (fy - y0 as f32, fx - x0 as f32);

            let top = logits[[y0, x0]] * (1.0 - wx) + logits[[y0, x1]] * wx;
            let bottom = logits[[y1, x0]] * (1.0 - wx) + logits[[y1, x1]] * wx;
            top * (1.0 - wy) + bottom * wy
        })
    }
}
