mod compositor;
mod palette;

pub use compositor::{Compositor, RenderedFrame, DEFAULT_BLEND_WEIGHT};
pub use palette::Palette;
