//! Shared infrastructure for the ramp fitting workspace.

pub mod float_ext;
pub mod log_setup;

/// Absolute tolerance used by [`float_ext::FloatExt::approximately_eq`].
pub const EPSILON: f64 = 1e-6;
