//! Re-encoding of images into working directories

pub mod encoder;
pub mod lossless;
pub mod optimize;
pub mod progress;
pub mod transparency;

pub use encoder::{EncodePlan, Encoded, OutputFormat, Reencoder};
pub use lossless::{ExternalOptimizer, LosslessOptimizer, Passthrough};
pub use optimize::optimize_images;
