//! Synthetic exposures for unit tests.

use ndarray::{Array2, Array4};

use crate::metadata::ExposureMetadata;
use crate::pipeline::RampModel;

/// Initialize tracing for tests. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Single-frame groups spaced `group_time` seconds apart.
pub fn metadata(ngroups: usize, group_time: f64) -> ExposureMetadata {
    ExposureMetadata {
        instrument: "NIRCAM".to_string(),
        frame_time: group_time,
        group_time,
        groupgap: 0,
        nframes: 1,
        drop_frames1: 0,
        ngroups,
    }
}

/// Noise-free ramps of `rate` counts per second with 10 s groups and no flags.
pub fn linear_model(
    nints: usize,
    ngroups: usize,
    nrows: usize,
    ncols: usize,
    rate: f32,
) -> RampModel {
    let group_time = 10.0;
    let data = Array4::from_shape_fn((nints, ngroups, nrows, ncols), |(_, g, r, c)| {
        (100 + 10 * r + c) as f32 + rate * group_time as f32 * g as f32
    });
    RampModel::new(
        data,
        Array4::zeros((nints, ngroups, nrows, ncols)),
        Array2::zeros((nrows, ncols)),
        metadata(ngroups, group_time),
    )
}
