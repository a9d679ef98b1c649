//! Incremental mask propagation for interactive video annotation
//!
//! Users place point prompts on arbitrary frames; [`PropagationCache`] drives
//! a stateful [`MaskOracle`] forward only as far as needed, caches merged
//! color overlays per frame, and answers "which object is under this point".

pub mod cache;
pub mod error;
pub mod oracle;
pub mod output;
pub mod overlay;
pub mod source;

pub use cache::PropagationCache;
pub use error::{Result, TrackerError};
pub use oracle::{MaskOracle, ObjectId, Point, PointLabel};
