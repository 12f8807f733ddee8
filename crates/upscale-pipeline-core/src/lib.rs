//! Core functionality for preparing image sets for upscaling.
//!
//! This library provides the stages of the pipeline:
//! - Indexing of source and working directories
//! - Transparency-aware re-encoding with optional lossless optimization
//! - Duplicate resolution with review copies and guarded deletion
//! - Size-based gating in front of an external upscaler
//!
//! [`Pipeline`] runs them in order over the configured directories.

// -- Internal Modules --
mod error;

// -- Public Re-exports --
pub use config::*;
pub use decision::{Decider, Prompt, StaticDecider};
pub use deduplication::{DuplicateSearch, MseSearch};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, Stage};
pub use processing::{LosslessOptimizer, Reencoder};
pub use types::*;
pub use upscale::{RealEsrganUpscaler, Upscaler};

// -- Public Modules --
pub mod config;
pub mod decision;
pub mod deduplication;
pub mod discovery;
pub mod logging;
pub mod pipeline;
pub mod processing;
pub mod safety;
pub mod types;
pub mod upscale;
