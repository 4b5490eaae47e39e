//! Ramp fitting for multi-read detector exposures.
//!
//! For every pixel the ramp of non-destructive reads is split at flagged
//! samples (cosmic-ray jumps, saturation, excluded reads) into clean segments.
//! Each segment gets an optimally weighted least-squares slope, and segments
//! are combined by inverse variance into per-integration and per-exposure
//! slopes.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ramp_fit::prelude::*;
//!
//! let config = RampFitConfig::from_yaml("max_cores: half\nsave_opt: true\n")?;
//! let output = ramp_fit(&model, readnoise.view(), gain.view(), &config)?;
//!
//! println!("slope of pixel (10, 20): {}", output.image.slope[(10, 20)]);
//! ```

pub mod combine;
pub mod config;
pub mod dq;
pub mod error;
pub mod fit;
pub mod metadata;
pub mod output;
pub mod partition;
pub mod pipeline;
pub(crate) mod pixel;
pub mod segment;

#[cfg(test)]
pub mod testing;

pub mod prelude;

// ============================================================================
// Entry points
// ============================================================================

pub use pipeline::{RampModel, fit_ramps, ramp_fit, ramp_fit_with_timing};

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    Algorithm, DEFAULT_BUFFER_SIZE, FitSettings, MaxCores, PowerStep, PowerTable, RampFitConfig,
    Weighting,
};
pub use dq::DqFlags;
pub use error::Error;
pub use metadata::{ExposureMetadata, FrameAveragedTiming, GroupTimeSpacing, GroupTiming};

// ============================================================================
// Engine
// ============================================================================

pub use combine::{
    ExposureCombiner, ExposureResult, IntegrationResult, InverseVarianceSum, RampResult,
    combine_integrations, combine_segments,
};
pub use fit::{NoiseModel, SegmentFit, UNUSABLE_VARIANCE, fit_segment, is_usable_variance};
pub use partition::{Section, WorkPartitioner};
pub use segment::{Segment, Termination, segments};

// ============================================================================
// Output
// ============================================================================

pub use output::{ImageInfo, IntegInfo, OptInfo, RampFitOutput};
