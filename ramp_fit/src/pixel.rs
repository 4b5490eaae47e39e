//! Fitting of a single pixel across all its integrations.

use ndarray::ArrayView2;

use crate::combine::{ExposureCombiner, ExposureResult, IntegrationResult, combine_segments};
use crate::config::FitSettings;
use crate::fit::{NoiseModel, SegmentFit, fit_segment, poisson_rate};
use crate::segment::{Segment, first_saturated, segments};

/// Per-run values shared by every pixel.
#[derive(Debug, Clone, Copy)]
pub struct PixelContext<'a> {
    pub settings: &'a FitSettings,
    /// Sample time of each group.
    pub times: &'a [f64],
    /// Time from reset to the first group, used for the pedestal.
    pub pedestal_time: f64,
}

/// One pixel's ramp: values and flags as `[integration, sample]`.
#[derive(Debug, Clone, Copy)]
pub struct PixelRamp<'a> {
    pub values: ArrayView2<'a, f32>,
    pub flags: ArrayView2<'a, u32>,
    pub pixel_dq: u32,
    /// Read noise in electrons per averaged group.
    pub readnoise: f32,
    pub gain: f32,
    pub pixel: (usize, usize),
}

/// Per-segment products of one integration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationSegments {
    pub fits: Vec<SegmentFit>,
    pub pedestal: f32,
    /// Jump magnitudes in sample order.
    pub crmag: Vec<f32>,
}

/// Everything produced for one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelFit {
    pub exposure: ExposureResult,
    pub integrations: Vec<IntegrationResult>,
    /// Pixel DQ after gain checks.
    pub pixel_dq: u32,
    /// Present when optional products were requested.
    pub segments: Option<Vec<IntegrationSegments>>,
}

impl PixelFit {
    /// Flags of the exposure image: static pixel flags plus everything the fit raised.
    pub fn image_dq(&self) -> u32 {
        self.pixel_dq | self.exposure.flags
    }

    pub fn integration_dq(&self, integration: usize) -> u32 {
        self.pixel_dq | self.integrations[integration].flags
    }
}

/// Fit every integration of one pixel and combine them.
pub fn fit_pixel(ramp: &PixelRamp<'_>, ctx: &PixelContext<'_>) -> PixelFit {
    let dq = &ctx.settings.dq;
    let nints = ramp.values.nrows();

    let mut pixel_dq = ramp.pixel_dq;
    if !(ramp.gain.is_finite() && ramp.gain > 0.0) {
        pixel_dq |= dq.no_gain_value | dq.do_not_use;
    }

    if pixel_dq & dq.short_circuit_mask() != 0 {
        let result = IntegrationResult::unusable(pixel_dq | dq.unreliable_slope);
        return PixelFit {
            exposure: result,
            integrations: vec![result; nints],
            pixel_dq,
            segments: ctx
                .settings
                .save_opt
                .then(|| vec![IntegrationSegments::default(); nints]),
        };
    }

    let mut combiner = ExposureCombiner::new();
    let mut integrations = Vec::with_capacity(nints);
    let mut opt = ctx.settings.save_opt.then(|| Vec::with_capacity(nints));
    let mut values = Vec::with_capacity(ctx.times.len());
    let mut flags = Vec::with_capacity(ctx.times.len());

    for integration in 0..nints {
        values.clear();
        values.extend(ramp.values.row(integration).iter().copied());
        flags.clear();
        flags.extend(ramp.flags.row(integration).iter().copied());

        let (result, fits) = fit_integration(&values, &flags, ramp, integration, ctx);
        combiner.push(&result);

        if let Some(opt) = opt.as_mut() {
            opt.push(IntegrationSegments {
                pedestal: pedestal(&values, &flags, result.slope, ctx),
                crmag: jump_magnitudes(&values, &flags, result.slope, ctx),
                fits,
            });
        }
        integrations.push(result);
    }

    PixelFit {
        exposure: combiner.finish(dq),
        integrations,
        pixel_dq,
        segments: opt,
    }
}

fn fit_integration(
    values: &[f32],
    flags: &[u32],
    ramp: &PixelRamp<'_>,
    integration: usize,
    ctx: &PixelContext<'_>,
) -> (IntegrationResult, Vec<SegmentFit>) {
    let dq = &ctx.settings.dq;
    let segs: Vec<Segment> = segments(flags, *dq, integration, ramp.pixel).collect();

    let noise = NoiseModel {
        readnoise: ramp.readnoise,
        gain: ramp.gain,
        poisson_rate: poisson_rate(values, ctx.times, &segs),
    };

    let fits: Vec<SegmentFit> = segs
        .iter()
        .map(|s| {
            fit_segment(
                &values[s.range()],
                &ctx.times[s.range()],
                &noise,
                &ctx.settings.power,
            )
        })
        .collect();

    let mut result = combine_segments(&fits, dq);
    if first_saturated(flags, *dq) == Some(0) {
        result.flags |= dq.saturated;
    }
    if flags.iter().any(|&f| dq.is_jump(f)) {
        result.flags |= dq.jump_det;
    }
    (result, fits)
}

/// Signal extrapolated from the first sample back to reset.
fn pedestal(values: &[f32], flags: &[u32], slope: f32, ctx: &PixelContext<'_>) -> f32 {
    match (values.first(), flags.first()) {
        (Some(&y0), Some(&f0)) if ctx.settings.dq.is_usable(f0) => {
            (y0 as f64 - slope as f64 * ctx.pedestal_time) as f32
        }
        _ => 0.0,
    }
}

/// Step of every flagged jump inside the unsaturated ramp, net of the fitted slope.
fn jump_magnitudes(
    values: &[f32],
    flags: &[u32],
    slope: f32,
    ctx: &PixelContext<'_>,
) -> Vec<f32> {
    let dq = &ctx.settings.dq;
    let end = first_saturated(flags, *dq).unwrap_or(flags.len());

    (1..end)
        .filter(|&k| {
            dq.is_jump(flags[k]) && dq.is_usable(flags[k]) && dq.is_usable(flags[k - 1])
        })
        .map(|k| {
            let dt = ctx.times[k] - ctx.times[k - 1];
            (values[k] as f64 - values[k - 1] as f64 - slope as f64 * dt) as f32
        })
        .collect()
}
