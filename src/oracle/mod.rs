mod preprocess;
mod sam;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use preprocess::Preprocessor;
pub use sam::{SamOnnxOracle, SamTrackState};
pub use types::{
    BinaryMask, FrameMasks, LogitMap, MaskOracle, ObjectId, Point, PointLabel, Propagation,
};

use anyhow::Result;
use std::path::Path;

/// Create the default mask oracle (ONNX SAM encoder + decoder)
pub fn create_default_oracle(encoder_path: &Path, decoder_path: &Path) -> Result<SamOnnxOracle> {
    SamOnnxOracle::new(encoder_path, decoder_path)
}
