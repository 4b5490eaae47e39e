use ndarray::{Array2, Array4};
use ramp_fit::{ExposureMetadata, RampModel};

pub const GROUP_TIME: f64 = 10.0;

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn metadata(ngroups: usize) -> ExposureMetadata {
    ExposureMetadata {
        instrument: "MIRI".to_string(),
        frame_time: GROUP_TIME,
        group_time: GROUP_TIME,
        groupgap: 0,
        nframes: 1,
        drop_frames1: 0,
        ngroups,
    }
}

/// Deterministic zero-mean jitter in `[-amplitude, amplitude]`.
pub fn jitter(seed: usize, amplitude: f32) -> f32 {
    let h = seed.wrapping_mul(2_654_435_761) % 1_000_003;
    (h as f32 / 1_000_003.0 * 2.0 - 1.0) * amplitude
}

/// Ramps with a per-pixel rate, offset and optional jitter; no flags set.
pub fn exposure(
    nints: usize,
    ngroups: usize,
    nrows: usize,
    ncols: usize,
    noise: f32,
) -> RampModel {
    let data = Array4::from_shape_fn((nints, ngroups, nrows, ncols), |(i, g, r, c)| {
        let rate = rate_of(r, c);
        let seed = ((i * ngroups + g) * nrows + r) * ncols + c;
        500.0 + rate * GROUP_TIME as f32 * g as f32 + jitter(seed, noise)
    });
    RampModel::new(
        data,
        Array4::zeros((nints, ngroups, nrows, ncols)),
        Array2::zeros((nrows, ncols)),
        metadata(ngroups),
    )
}

pub fn rate_of(row: usize, col: usize) -> f32 {
    0.5 + 0.25 * ((row * 7 + col * 3) % 11) as f32
}

pub fn planes(nrows: usize, ncols: usize, readnoise: f32, gain: f32) -> (Array2<f32>, Array2<f32>) {
    (
        Array2::from_elem((nrows, ncols), readnoise),
        Array2::from_elem((nrows, ncols), gain),
    )
}

/// Ordinary least-squares slope of `values` sampled every `GROUP_TIME` seconds.
pub fn ols_slope(values: &[f32]) -> f64 {
    let n = values.len() as f64;
    let mean_t = (n - 1.0) / 2.0 * GROUP_TIME;
    let mean_y = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dt = i as f64 * GROUP_TIME - mean_t;
            (num + dt * (y as f64 - mean_y), den + dt * dt)
        });
    num / den
}
