//! Error types for ramp fitting.
//!
//! Only configuration-level problems surface as errors. Per-pixel problems
//! (no usable samples, missing gain, degenerate timing) are recorded in the
//! output flags instead.

use thiserror::Error;

use crate::config::Algorithm;

/// Errors raised before any fitting starts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("DQ flag '{0}' is required for ramp fitting but is not mapped")]
    MissingDqFlag(&'static str),

    #[error("DQ flag '{0}' must map to a non-zero bit mask")]
    ZeroDqFlag(&'static str),

    #[error("The {0} ramp fitting algorithm is not implemented")]
    UnsupportedAlgorithm(Algorithm),

    #[error("Invalid exposure metadata: {field} = {value}")]
    InvalidMetadata { field: &'static str, value: String },

    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Metadata ngroups ({metadata}) does not match the ramp cube ({cube})")]
    GroupCountMismatch { metadata: usize, cube: usize },

    #[error("Ramp cube has an empty axis: {shape:?}")]
    EmptyRamp { shape: [usize; 4] },

    #[error("Failed to build worker pool with {workers} threads: {source}")]
    WorkerPool {
        workers: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },

    #[error("Failed to parse ramp fit configuration: {0}")]
    ConfigParse(#[from] serde_yml::Error),
}
