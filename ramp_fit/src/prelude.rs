//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use ramp_fit::prelude::*;
//! ```

// Entry points
pub use crate::{RampModel, ramp_fit, ramp_fit_with_timing};

// Configuration
pub use crate::{
    Algorithm, DqFlags, Error, ExposureMetadata, FrameAveragedTiming, GroupTimeSpacing,
    GroupTiming, MaxCores, PowerTable, RampFitConfig, Weighting,
};

// Output
pub use crate::{ImageInfo, IntegInfo, OptInfo, RampFitOutput, UNUSABLE_VARIANCE};
