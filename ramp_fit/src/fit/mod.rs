//! Optimally weighted slope fit of a single segment.
//!
//! # Algorithm
//!
//! Samples are weighted by `(|i - m| / m)^p` where `m = (n - 1) / 2` is the
//! segment midpoint and `p` grows with the segment SNR (Fixsen et al. 2000).
//! Low-signal segments (read-noise dominated) get `p = 0`, an ordinary
//! unweighted fit. High-signal segments (shot-noise dominated) push weight to
//! the segment ends, approaching a two-point estimate. The slope comes from
//! the closed-form weighted normal equations with times measured from the
//! segment start.
//!
//! The variance is the sum of a read-noise term for `n` evenly spaced samples,
//! `12 rn² / ((n³ - n) dt²)`, and a Poisson term `rate / (gain * T)` driven by
//! the integration-wide rate estimate from [`poisson_rate`].

use crate::config::PowerTable;
use crate::segment::Segment;


/// Variance marking a result as unusable. Anything at or above it gets zero
/// weight when combined.
pub const UNUSABLE_VARIANCE: f32 = 1.0e8;

/// True for a variance that may take part in an inverse-variance combination.
#[inline]
pub fn is_usable_variance(variance: f32) -> bool {
    variance.is_finite() && variance > 0.0 && variance < UNUSABLE_VARIANCE
}

/// Per-pixel noise inputs of a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    /// Read noise in electrons, already scaled to one averaged group.
    pub readnoise: f32,
    /// Gain in electrons per count.
    pub gain: f32,
    /// Count rate driving the Poisson variance term.
    pub poisson_rate: f32,
}

/// Fit result of one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentFit {
    pub slope: f32,
    pub variance: f32,
    pub var_poisson: f32,
    pub var_rnoise: f32,
    /// Samples in the segment.
    pub samples: usize,
    /// Fitted signal at the segment's first sample time.
    pub intercept: f32,
    pub sig_intercept: f32,
}

impl SegmentFit {
    pub fn unusable(samples: usize) -> Self {
        Self {
            slope: 0.0,
            variance: UNUSABLE_VARIANCE,
            var_poisson: UNUSABLE_VARIANCE,
            var_rnoise: UNUSABLE_VARIANCE,
            samples,
            intercept: 0.0,
            sig_intercept: 0.0,
        }
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        is_usable_variance(self.variance)
    }

    /// Inverse variance, 0 for unusable segments.
    #[inline]
    pub fn weight(&self) -> f32 {
        if self.is_usable() {
            1.0 / self.variance
        } else {
            0.0
        }
    }

    #[inline]
    pub fn sigma(&self) -> f32 {
        self.variance.sqrt()
    }
}

/// Straight line `y = intercept + slope * (t - t0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineFit {
    slope: f64,
    intercept: f64,
    /// Intercept sigma per unit sample noise.
    intercept_scale: f64,
}

/// Weighted sums of the normal equations.
#[derive(Debug, Default)]
struct NormalEquations {
    sw: f64,
    sx: f64,
    sxx: f64,
    sy: f64,
    sxy: f64,
    /// Σ w² and Σ w² x, Σ w² x² for the intercept error under equal sample noise.
    sww: f64,
    swwx: f64,
    swwxx: f64,
}

impl NormalEquations {
    #[inline]
    fn accumulate(&mut self, x: f64, y: f64, w: f64) {
        self.sw += w;
        self.sx += w * x;
        self.sxx += w * x * x;
        self.sy += w * y;
        self.sxy += w * x * y;
        let ww = w * w;
        self.sww += ww;
        self.swwx += ww * x;
        self.swwxx += ww * x * x;
    }

    fn determinant(&self) -> f64 {
        self.sw * self.sxx - self.sx * self.sx
    }

    fn solve(&self) -> Option<LineFit> {
        let det = self.determinant();
        // Relative test: the terms are O(sw * sxx) and cancel for degenerate times.
        if !(det > f64::EPSILON * self.sw * self.sxx) {
            return None;
        }

        let slope = (self.sw * self.sxy - self.sx * self.sy) / det;
        let intercept = (self.sxx * self.sy - self.sx * self.sxy) / det;

        // intercept = Σ c_i y_i with c_i = w_i (sxx - sx x_i) / det.
        let c_sq = self.sxx * self.sxx * self.sww - 2.0 * self.sxx * self.sx * self.swwx
            + self.sx * self.sx * self.swwxx;
        let intercept_scale = (c_sq.max(0.0)).sqrt() / det;

        Some(LineFit {
            slope,
            intercept,
            intercept_scale,
        })
    }
}

fn two_point(values: &[f32], times: &[f64]) -> LineFit {
    let last = values.len() - 1;
    let dt = times[last] - times[0];
    LineFit {
        slope: (values[last] as f64 - values[0] as f64) / dt,
        intercept: values[0] as f64,
        intercept_scale: 1.0,
    }
}

/// Segment SNR from the accumulated signal in electrons.
fn segment_snr(values: &[f32], noise: &NoiseModel) -> f64 {
    let last = values.len() - 1;
    let signal = ((values[last] - values[0]) as f64).max(0.0) * noise.gain as f64;
    let readnoise = noise.readnoise as f64;
    let denom = (readnoise * readnoise + signal).sqrt();
    if denom > 0.0 { signal / denom } else { 0.0 }
}

/// Optimal weights for `n` samples with exponent `power`.
pub fn optimal_weights(n: usize, power: f64) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    let mid = (n - 1) as f64 / 2.0;
    (0..n)
        .map(|i| ((i as f64 - mid).abs() / mid).powf(power))
        .collect()
}

fn weighted_fit(values: &[f32], times: &[f64], weights: &[f64]) -> Option<LineFit> {
    let t0 = times[0];
    let mut eq = NormalEquations::default();
    for ((&y, &t), &w) in values.iter().zip(times).zip(weights) {
        eq.accumulate(t - t0, y as f64, w);
    }
    eq.solve()
}

/// Fit one segment given its sample values and sample times.
///
/// - 1 sample, non-positive time span, or missing gain: unusable placeholder
/// - 2 samples: two-point slope
/// - 3+ samples: optimally weighted least squares, two-point fallback when
///   the normal equations are singular
pub fn fit_segment(
    values: &[f32],
    times: &[f64],
    noise: &NoiseModel,
    power: &PowerTable,
) -> SegmentFit {
    debug_assert_eq!(values.len(), times.len());
    let n = values.len();
    if n < 2 {
        return SegmentFit::unusable(n);
    }

    let span = times[n - 1] - times[0];
    let gain = noise.gain as f64;
    if !(span.is_finite() && span > 0.0) || !(gain.is_finite() && gain > 0.0) {
        return SegmentFit::unusable(n);
    }

    let line = if n == 2 {
        two_point(values, times)
    } else {
        let p = power.power(segment_snr(values, noise));
        let weights = optimal_weights(n, p);
        weighted_fit(values, times, &weights).unwrap_or_else(|| two_point(values, times))
    };

    let readnoise_counts = noise.readnoise as f64 / gain;
    let (var_poisson, var_rnoise) =
        segment_variance(n, span, readnoise_counts, gain, noise.poisson_rate as f64);
    let variance = (var_poisson + var_rnoise) as f32;

    if !is_usable_variance(variance) || !line.slope.is_finite() {
        return SegmentFit::unusable(n);
    }

    SegmentFit {
        slope: line.slope as f32,
        variance,
        var_poisson: var_poisson as f32,
        var_rnoise: var_rnoise as f32,
        samples: n,
        intercept: line.intercept as f32,
        sig_intercept: (readnoise_counts * line.intercept_scale) as f32,
    }
}

/// `(poisson, read noise)` slope variance of an `n`-sample segment spanning `span` seconds.
pub fn segment_variance(
    n: usize,
    span: f64,
    readnoise_counts: f64,
    gain: f64,
    rate: f64,
) -> (f64, f64) {
    let nf = n as f64;
    let dt = span / (nf - 1.0);
    let var_rnoise = 12.0 * readnoise_counts * readnoise_counts / ((nf * nf * nf - nf) * dt * dt);
    let var_poisson = rate.max(0.0) / (gain * span);
    (var_poisson, var_rnoise)
}

/// Rate estimate for the Poisson term: the median of first differences
/// inside the segments, per unit time, clamped at zero.
pub fn poisson_rate(values: &[f32], times: &[f64], segments: &[Segment]) -> f32 {
    let mut rates: Vec<f64> = segments
        .iter()
        .flat_map(|segment| segment.range().skip(1))
        .filter_map(|k| {
            let dt = times[k] - times[k - 1];
            (dt > 0.0).then(|| (values[k] as f64 - values[k - 1] as f64) / dt)
        })
        .filter(|rate| rate.is_finite())
        .collect();

    if rates.is_empty() {
        return 0.0;
    }
    median(&mut rates).max(0.0) as f32
}

fn median(values: &mut [f64]) -> f64 {
    debug_assert!(!values.is_empty());
    let len = values.len();
    let mid = len / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        upper
    } else {
        let lower_max = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower_max + upper) / 2.0
    }
}
