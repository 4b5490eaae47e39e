//! Example: fit a synthetic exposure with cosmic-ray hits and saturation.
//!
//! Builds a small two-integration exposure, flags a handful of jumps and
//! saturated samples, fits it and prints a summary of the output planes.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example synthetic_exposure
//! cargo run --example synthetic_exposure -- path/to/ramp_fit.yml
//! ```
//!
//! The optional YAML file is a `RampFitConfig`, e.g.
//!
//! ```yaml
//! max_cores: half
//! save_opt: true
//! power_tables:
//!   nircam:
//!     steps: [{ snr_below: 5.0, power: 0.0 }]
//!     max_power: 2.0
//! ```

use std::env;
use std::time::Instant;

use anyhow::Context;
use common::log_setup::{LogConfig, setup_logging};
use ndarray::{Array2, Array4};
use ramp_fit::prelude::*;

const NINTS: usize = 2;
const NGROUPS: usize = 12;
const NROWS: usize = 64;
const NCOLS: usize = 64;
const GROUP_TIME: f64 = 10.737;

/// Counts at which a sample is flagged saturated.
const FULL_WELL: f32 = 60_000.0;

fn main() -> anyhow::Result<()> {
    setup_logging(&LogConfig::console_only("info"));

    let config = match env::args().nth(1) {
        Some(path) => {
            let yaml = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {path}"))?;
            RampFitConfig::from_yaml(&yaml)?
        }
        None => RampFitConfig {
            max_cores: MaxCores::Half,
            save_opt: true,
            ..Default::default()
        },
    };

    let dq = DqFlags::from_mapping(&config.dq_flags)?;
    let model = synthetic_exposure(&dq);
    let readnoise = Array2::from_elem((NROWS, NCOLS), 14.0f32);
    let mut gain = Array2::from_elem((NROWS, NCOLS), 2.05f32);
    gain[(0, 0)] = f32::NAN;

    let start = Instant::now();
    let output = ramp_fit(&model, readnoise.view(), gain.view(), &config)?;
    let elapsed = start.elapsed();

    let usable: Vec<f32> = output
        .image
        .slope
        .iter()
        .zip(output.image.variance.iter())
        .filter(|&(_, &v)| v < UNUSABLE_VARIANCE)
        .map(|(&s, _)| s)
        .collect();
    let mean_slope = usable.iter().sum::<f32>() / usable.len().max(1) as f32;
    let count = |flag: u32| output.image.dq.iter().filter(|&&f| f & flag != 0).count();

    println!("Fitted {NINTS}x{NGROUPS}x{NROWS}x{NCOLS} in {elapsed:.2?}");
    println!("  usable pixels:     {}", usable.len());
    println!("  mean slope:        {mean_slope:.4} counts/s");
    println!("  jump pixels:       {}", count(dq.jump_det));
    println!("  saturated pixels:  {}", count(dq.saturated));
    println!("  unreliable pixels: {}", count(dq.unreliable_slope));
    if let Some(opt) = &output.opt {
        println!(
            "  optional products: {} segments, {} jumps per integration max",
            opt.max_segments(),
            opt.max_jumps()
        );
    }

    Ok(())
}

fn synthetic_exposure(dq: &DqFlags) -> RampModel {
    let shape = (NINTS, NGROUPS, NROWS, NCOLS);
    let mut data = Array4::from_shape_fn(shape, |(_, g, r, c)| {
        let rate = 1.0 + (r * NCOLS + c) as f32 * 0.02;
        let ripple = ((g * 13 + r * 7 + c * 3) % 9) as f32 - 4.0;
        2_000.0 + rate * GROUP_TIME as f32 * g as f32 + ripple
    });
    let mut groupdq = Array4::<u32>::zeros(shape);

    // Cosmic rays: a step that persists to the end of the integration.
    for (i, r, c, g) in [(0, 5, 9, 4), (1, 5, 9, 7), (0, 30, 31, 2), (1, 60, 3, 10)] {
        for k in g..NGROUPS {
            data[(i, k, r, c)] += 850.0;
        }
        groupdq[(i, g, r, c)] |= dq.jump_det;
    }

    // A bright corner that hits full well part way up the ramp.
    for r in NROWS - 4..NROWS {
        for c in NCOLS - 4..NCOLS {
            for i in 0..NINTS {
                for g in 0..NGROUPS {
                    let y = 40_000.0 + 3_000.0 * g as f32;
                    data[(i, g, r, c)] = y.min(FULL_WELL);
                    if y >= FULL_WELL {
                        groupdq[(i, g, r, c)] |= dq.saturated;
                    }
                }
            }
        }
    }

    RampModel::new(
        data,
        groupdq,
        Array2::zeros((NROWS, NCOLS)),
        ExposureMetadata {
            instrument: "NIRCAM".to_string(),
            frame_time: GROUP_TIME,
            group_time: GROUP_TIME,
            groupgap: 0,
            nframes: 1,
            drop_frames1: 0,
            ngroups: NGROUPS,
        },
    )
}
