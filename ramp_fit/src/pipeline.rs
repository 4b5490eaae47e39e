//! Top-level entry points: validation, partitioning and assembly.

use std::time::Instant;

use ndarray::{Array2, Array4, ArrayView2, s};

use crate::config::{FitSettings, RampFitConfig};
use crate::error::Error;
use crate::metadata::{ExposureMetadata, GroupTimeSpacing, GroupTiming};
use crate::output::{RampFitOutput, SectionOutput, assemble};
use crate::partition::{Section, WorkPartitioner};
use crate::pixel::{PixelContext, PixelRamp, fit_pixel};

/// Ramp data of one exposure, cubes laid out `[integration, group, row, column]`.
#[derive(Debug, Clone)]
pub struct RampModel {
    pub data: Array4<f32>,
    /// Per-sample error estimates; shape-checked but not used by the OLS fit.
    pub err: Array4<f32>,
    pub groupdq: Array4<u32>,
    /// Static per-pixel flags, `[row, column]`.
    pub pixeldq: Array2<u32>,
    pub meta: ExposureMetadata,
}

impl RampModel {
    /// Model with a zero error cube.
    pub fn new(
        data: Array4<f32>,
        groupdq: Array4<u32>,
        pixeldq: Array2<u32>,
        meta: ExposureMetadata,
    ) -> Self {
        let err = Array4::zeros(data.raw_dim());
        Self {
            data,
            err,
            groupdq,
            pixeldq,
            meta,
        }
    }

    /// `[nints, ngroups, nrows, ncols]`
    pub fn shape(&self) -> [usize; 4] {
        let (nints, ngroups, nrows, ncols) = self.data.dim();
        [nints, ngroups, nrows, ncols]
    }

    /// Check that every array agrees with the ramp cube and the metadata.
    pub fn validate(&self) -> Result<(), Error> {
        let shape = self.shape();
        if shape.contains(&0) {
            return Err(Error::EmptyRamp { shape });
        }
        if self.meta.ngroups != shape[1] {
            return Err(Error::GroupCountMismatch {
                metadata: self.meta.ngroups,
                cube: shape[1],
            });
        }
        check_shape("err", self.err.shape(), &shape)?;
        check_shape("groupdq", self.groupdq.shape(), &shape)?;
        check_shape("pixeldq", self.pixeldq.shape(), &shape[2..])?;
        self.meta.validate()
    }
}

fn check_shape(name: &'static str, actual: &[usize], expected: &[usize]) -> Result<(), Error> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

/// Fit an exposure with groups spaced by the metadata's `group_time`.
///
/// `readnoise` is the CDS read noise in counts and `gain` is in electrons per
/// count, both `[row, column]`.
pub fn ramp_fit(
    model: &RampModel,
    readnoise: ArrayView2<'_, f32>,
    gain: ArrayView2<'_, f32>,
    config: &RampFitConfig,
) -> Result<RampFitOutput, Error> {
    let timing = GroupTimeSpacing::from_metadata(&model.meta);
    ramp_fit_with_timing(model, readnoise, gain, config, &timing)
}

/// [`ramp_fit`] with a caller-supplied group timing model.
pub fn ramp_fit_with_timing(
    model: &RampModel,
    readnoise: ArrayView2<'_, f32>,
    gain: ArrayView2<'_, f32>,
    config: &RampFitConfig,
    timing: &dyn GroupTiming,
) -> Result<RampFitOutput, Error> {
    let settings = config.resolve(&model.meta)?;
    model.validate()?;
    let [_, _, nrows, ncols] = model.shape();
    check_shape("readnoise", readnoise.shape(), &[nrows, ncols])?;
    check_shape("gain", gain.shape(), &[nrows, ncols])?;

    // CDS counts to electrons per averaged group.
    let scale = 1.0 / (2.0 * model.meta.nframes as f32).sqrt();
    let mut readnoise = readnoise.to_owned();
    readnoise.zip_mut_with(&gain, |rn, &g| *rn *= g * scale);

    fit_ramps(model, readnoise.view(), gain, &settings, timing)
}

/// Fit every pixel with resolved settings.
///
/// `readnoise` must already be in electrons per averaged group.
pub fn fit_ramps(
    model: &RampModel,
    readnoise: ArrayView2<'_, f32>,
    gain: ArrayView2<'_, f32>,
    settings: &FitSettings,
    timing: &dyn GroupTiming,
) -> Result<RampFitOutput, Error> {
    model.validate()?;
    let shape = model.shape();
    let [nints, ngroups, nrows, ncols] = shape;
    check_shape("readnoise", readnoise.shape(), &[nrows, ncols])?;
    check_shape("gain", gain.shape(), &[nrows, ncols])?;

    let start = Instant::now();
    let times = timing.sample_times(ngroups);
    let ctx = PixelContext {
        settings,
        times: &times,
        pedestal_time: model.meta.pedestal_time(),
    };
    let inputs = SectionInputs {
        model,
        readnoise: readnoise.view(),
        gain: gain.view(),
        ctx: &ctx,
    };

    let partitioner = WorkPartitioner::for_ramp(shape, settings.buffer_size);
    let sections = partitioner.run(settings.workers, |section| inputs.fit_section(section))?;

    let unreliable: usize = sections
        .iter()
        .map(|s| s.count_flagged(settings.dq.unreliable_slope))
        .sum();
    let output = assemble(sections, nints, nrows, ncols, settings.save_opt);

    tracing::info!(
        nints,
        ngroups,
        nrows,
        ncols,
        workers = settings.workers,
        save_opt = settings.save_opt,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Ramp fitting complete"
    );
    if unreliable > 0 {
        tracing::warn!(
            unreliable,
            pixels = nrows * ncols,
            "Pixels without a usable slope"
        );
    }

    Ok(output)
}

/// Borrowed inputs shared by every section.
struct SectionInputs<'a> {
    model: &'a RampModel,
    readnoise: ArrayView2<'a, f32>,
    gain: ArrayView2<'a, f32>,
    ctx: &'a PixelContext<'a>,
}

impl SectionInputs<'_> {
    fn fit_section(&self, section: Section) -> SectionOutput {
        let [nints, _, _, ncols] = self.model.shape();
        let mut out = SectionOutput::new(section, nints, ncols, self.ctx.settings.save_opt);

        for (local_row, row) in section.row_range().enumerate() {
            for col in 0..ncols {
                let ramp = PixelRamp {
                    values: self.model.data.slice(s![.., .., row, col]),
                    flags: self.model.groupdq.slice(s![.., .., row, col]),
                    pixel_dq: self.model.pixeldq[(row, col)],
                    readnoise: self.readnoise[(row, col)],
                    gain: self.gain[(row, col)],
                    pixel: (row, col),
                };
                out.record(local_row, col, fit_pixel(&ramp, self.ctx));
            }
        }

        tracing::debug!(
            section = section.index,
            row_start = section.row_start,
            row_end = section.row_end,
            "Fitted section"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::config::{Algorithm, PowerTable};
    use crate::dq::{DqFlags, SATURATED};
    use crate::testing::{init_tracing, linear_model, metadata};

    #[test]
    fn test_validate_rejects_group_count_mismatch() {
        let mut model = linear_model(1, 4, 2, 2, 1.0);
        model.meta.ngroups = 5;
        assert!(matches!(
            model.validate(),
            Err(Error::GroupCountMismatch { metadata: 5, cube: 4 })
        ));
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let mut model = linear_model(1, 4, 2, 2, 1.0);
        model.pixeldq = Array2::zeros((2, 3));
        match model.validate() {
            Err(Error::ShapeMismatch { name, .. }) => assert_eq!(name, "pixeldq"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_empty_axis() {
        let model = RampModel::new(
            Array4::zeros((1, 4, 0, 2)),
            Array4::zeros((1, 4, 0, 2)),
            Array2::zeros((0, 2)),
            metadata(4, 10.0),
        );
        assert!(matches!(model.validate(), Err(Error::EmptyRamp { .. })));
    }

    #[test]
    fn test_plane_shapes_checked() {
        let model = linear_model(1, 4, 2, 2, 1.0);
        let good = Array2::from_elem((2, 2), 1.0f32);
        let bad = Array2::from_elem((2, 1), 1.0f32);
        let err = ramp_fit(&model, good.view(), bad.view(), &RampFitConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { name: "gain", .. }));
    }

    #[test]
    fn test_gls_rejected_before_fitting() {
        let model = linear_model(1, 4, 2, 2, 1.0);
        let planes = Array2::from_elem((2, 2), 1.0f32);
        let config = RampFitConfig {
            algorithm: Algorithm::Gls,
            ..Default::default()
        };
        let err = ramp_fit(&model, planes.view(), planes.view(), &config).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(Algorithm::Gls)));
    }

    #[test]
    fn test_missing_flag_rejected() {
        let model = linear_model(1, 4, 2, 2, 1.0);
        let planes = Array2::from_elem((2, 2), 1.0f32);
        let mut config = RampFitConfig::default();
        config.dq_flags.remove(SATURATED);
        let err = ramp_fit(&model, planes.view(), planes.view(), &config).unwrap_err();
        assert!(matches!(err, Error::MissingDqFlag(SATURATED)));
    }

    #[test]
    fn test_readnoise_is_scaled_to_electrons() {
        init_tracing();
        // Two groups 10 s apart: the slope variance is the CDS variance / dt².
        let model = linear_model(1, 2, 1, 1, 3.0);
        let readnoise = Array2::from_elem((1, 1), 10.0f32);
        let gain = Array2::from_elem((1, 1), 2.0f32);
        let out = ramp_fit(
            &model,
            readnoise.view(),
            gain.view(),
            &RampFitConfig::default(),
        )
        .unwrap();

        assert!((out.image.slope[(0, 0)] - 3.0).abs() < 1e-5);
        assert!((out.image.var_rnoise[(0, 0)] - 1.0).abs() < 1e-5);
        // rate 3 / (gain 2 * 10 s)
        assert!((out.image.var_poisson[(0, 0)] - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_fit_ramps_with_custom_settings() {
        init_tracing();
        let model = linear_model(2, 6, 5, 3, 0.5);
        let readnoise = Array2::from_elem((5, 3), 8.0f32);
        let gain = Array2::from_elem((5, 3), 1.5f32);
        let settings = FitSettings::new(DqFlags::JWST, 2)
            .with_power(PowerTable::uniform())
            .with_buffer_size(1);
        let timing = GroupTimeSpacing::from_metadata(&model.meta);

        let out = fit_ramps(&model, readnoise.view(), gain.view(), &settings, &timing).unwrap();
        assert_eq!(out.image.slope.dim(), (5, 3));
        assert_eq!(out.integ.slope.dim(), (2, 5, 3));
        for &slope in out.image.slope.iter() {
            assert!((slope - 0.5).abs() < 1e-5);
        }
        assert!(out.opt.is_none());
    }
}
