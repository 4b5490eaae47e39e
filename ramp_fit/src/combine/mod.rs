//! Inverse-variance combination of segment and integration results.
//!
//! `slope = Σ(s_i / v_i) / Σ(1 / v_i)`, `variance = 1 / Σ(1 / v_i)`, over the
//! inputs with a usable variance. The same accumulator serves both levels;
//! it is a plain sum, so pushing inputs one at a time, in any order, or
//! merging partial accumulators gives the same result up to rounding.

use crate::dq::DqFlags;
use crate::fit::{SegmentFit, UNUSABLE_VARIANCE, is_usable_variance};


/// Slope estimate of one pixel for one integration or for the whole exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampResult {
    pub slope: f32,
    pub variance: f32,
    pub var_poisson: f32,
    pub var_rnoise: f32,
    pub flags: u32,
}

pub type IntegrationResult = RampResult;
pub type ExposureResult = RampResult;

impl RampResult {
    /// Zero slope with the unusable variance sentinel.
    pub fn unusable(flags: u32) -> Self {
        Self {
            slope: 0.0,
            variance: UNUSABLE_VARIANCE,
            var_poisson: UNUSABLE_VARIANCE,
            var_rnoise: UNUSABLE_VARIANCE,
            flags,
        }
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        is_usable_variance(self.variance)
    }

    /// Standard error of the slope.
    #[inline]
    pub fn err(&self) -> f32 {
        self.variance.sqrt()
    }
}

/// `1 / Σ(1 / v)` for one variance component. A zero component pins the
/// combination at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ComponentSum {
    inverse: f64,
    has_zero: bool,
}

impl ComponentSum {
    #[inline]
    fn push(&mut self, variance: f32) {
        if variance > 0.0 {
            self.inverse += 1.0 / variance as f64;
        } else {
            self.has_zero = true;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.inverse += other.inverse;
        self.has_zero |= other.has_zero;
    }

    fn finish(&self) -> f32 {
        if self.has_zero {
            0.0
        } else if self.inverse > 0.0 {
            (1.0 / self.inverse) as f32
        } else {
            UNUSABLE_VARIANCE
        }
    }
}

/// Running inverse-variance sums.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InverseVarianceSum {
    inverse_variance: f64,
    weighted_slope: f64,
    poisson: ComponentSum,
    rnoise: ComponentSum,
    usable: usize,
    flags: u32,
}

impl InverseVarianceSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one estimate. Unusable variances are skipped.
    pub fn push(&mut self, slope: f32, variance: f32, var_poisson: f32, var_rnoise: f32) {
        if !is_usable_variance(variance) {
            return;
        }
        let inverse = 1.0 / variance as f64;
        self.inverse_variance += inverse;
        self.weighted_slope += slope as f64 * inverse;
        self.poisson.push(var_poisson);
        self.rnoise.push(var_rnoise);
        self.usable += 1;
    }

    pub fn push_segment(&mut self, fit: &SegmentFit) {
        self.push(fit.slope, fit.variance, fit.var_poisson, fit.var_rnoise);
    }

    /// Add a result's estimate and fold its flags into the union.
    pub fn push_result(&mut self, result: &RampResult) {
        self.push(
            result.slope,
            result.variance,
            result.var_poisson,
            result.var_rnoise,
        );
        self.flags |= result.flags;
    }

    pub fn merge(&mut self, other: &Self) {
        self.inverse_variance += other.inverse_variance;
        self.weighted_slope += other.weighted_slope;
        self.poisson.merge(&other.poisson);
        self.rnoise.merge(&other.rnoise);
        self.usable += other.usable;
        self.flags |= other.flags;
    }

    /// Number of usable estimates pushed so far.
    pub fn usable(&self) -> usize {
        self.usable
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Combined result; `unreliable_flag` is added when nothing usable was pushed.
    pub fn finish(&self, unreliable_flag: u32) -> RampResult {
        if self.usable == 0 || !(self.inverse_variance > 0.0) {
            return RampResult::unusable(self.flags | unreliable_flag);
        }
        RampResult {
            slope: (self.weighted_slope / self.inverse_variance) as f32,
            variance: (1.0 / self.inverse_variance) as f32,
            var_poisson: self.poisson.finish(),
            var_rnoise: self.rnoise.finish(),
            flags: self.flags,
        }
    }
}

/// Combine the segment fits of one pixel and integration.
pub fn combine_segments(fits: &[SegmentFit], dq: &DqFlags) -> IntegrationResult {
    let mut sum = InverseVarianceSum::new();
    for fit in fits {
        sum.push_segment(fit);
    }
    sum.finish(dq.unreliable_slope)
}

/// Streaming exposure combiner.
///
/// Integrations can be pushed one at a time or gathered from partial combiners
/// with [`ExposureCombiner::merge`]. A single integration passes through
/// unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExposureCombiner {
    sum: InverseVarianceSum,
    count: usize,
    only: Option<IntegrationResult>,
}

impl ExposureCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: &IntegrationResult) {
        self.sum.push_result(result);
        self.count += 1;
        self.only = (self.count == 1).then_some(*result);
    }

    pub fn merge(&mut self, other: &Self) {
        self.sum.merge(&other.sum);
        self.only = match (self.count, other.count) {
            (_, 0) => self.only,
            (0, _) => other.only,
            _ => None,
        };
        self.count += other.count;
    }

    /// Integrations pushed so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(&self, dq: &DqFlags) -> ExposureResult {
        match self.only {
            Some(result) => result,
            None => self.sum.finish(dq.unreliable_slope),
        }
    }
}

/// Combine all integration results of one pixel.
pub fn combine_integrations(results: &[IntegrationResult], dq: &DqFlags) -> ExposureResult {
    let mut combiner = ExposureCombiner::new();
    for result in results {
        combiner.push(result);
    }
    combiner.finish(dq)
}
