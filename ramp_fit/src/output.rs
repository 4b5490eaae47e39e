//! Output bundles and their assembly from per-section results.

use ndarray::{Array2, Array3, Array4, s};

use crate::combine::RampResult;
use crate::partition::Section;
use crate::pixel::{IntegrationSegments, PixelFit};

/// Per-pixel exposure products, `[rows, cols]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub slope: Array2<f32>,
    pub dq: Array2<u32>,
    pub var_poisson: Array2<f32>,
    pub var_rnoise: Array2<f32>,
    pub variance: Array2<f32>,
    pub err: Array2<f32>,
}

impl ImageInfo {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        let shape = (rows, cols);
        Self {
            slope: Array2::zeros(shape),
            dq: Array2::zeros(shape),
            var_poisson: Array2::zeros(shape),
            var_rnoise: Array2::zeros(shape),
            variance: Array2::zeros(shape),
            err: Array2::zeros(shape),
        }
    }

    fn set(&mut self, idx: (usize, usize), result: &RampResult, dq: u32) {
        self.slope[idx] = result.slope;
        self.dq[idx] = dq;
        self.var_poisson[idx] = result.var_poisson;
        self.var_rnoise[idx] = result.var_rnoise;
        self.variance[idx] = result.variance;
        self.err[idx] = result.err();
    }

    fn assign_rows(&mut self, row_start: usize, part: &Self) {
        let rows = s![row_start..row_start + part.slope.nrows(), ..];
        self.slope.slice_mut(rows).assign(&part.slope);
        self.dq.slice_mut(rows).assign(&part.dq);
        self.var_poisson.slice_mut(rows).assign(&part.var_poisson);
        self.var_rnoise.slice_mut(rows).assign(&part.var_rnoise);
        self.variance.slice_mut(rows).assign(&part.variance);
        self.err.slice_mut(rows).assign(&part.err);
    }
}

/// Per-integration products, `[nints, rows, cols]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegInfo {
    pub slope: Array3<f32>,
    pub dq: Array3<u32>,
    pub var_poisson: Array3<f32>,
    pub var_rnoise: Array3<f32>,
    pub variance: Array3<f32>,
    pub err: Array3<f32>,
}

impl IntegInfo {
    pub fn zeros(nints: usize, rows: usize, cols: usize) -> Self {
        let shape = (nints, rows, cols);
        Self {
            slope: Array3::zeros(shape),
            dq: Array3::zeros(shape),
            var_poisson: Array3::zeros(shape),
            var_rnoise: Array3::zeros(shape),
            variance: Array3::zeros(shape),
            err: Array3::zeros(shape),
        }
    }

    fn set(&mut self, idx: (usize, usize, usize), result: &RampResult, dq: u32) {
        self.slope[idx] = result.slope;
        self.dq[idx] = dq;
        self.var_poisson[idx] = result.var_poisson;
        self.var_rnoise[idx] = result.var_rnoise;
        self.variance[idx] = result.variance;
        self.err[idx] = result.err();
    }

    fn assign_rows(&mut self, row_start: usize, part: &Self) {
        let rows = s![.., row_start..row_start + part.slope.dim().1, ..];
        self.slope.slice_mut(rows).assign(&part.slope);
        self.dq.slice_mut(rows).assign(&part.dq);
        self.var_poisson.slice_mut(rows).assign(&part.var_poisson);
        self.var_rnoise.slice_mut(rows).assign(&part.var_rnoise);
        self.variance.slice_mut(rows).assign(&part.variance);
        self.err.slice_mut(rows).assign(&part.err);
    }
}

/// Per-segment products, `[nints, max_segments, rows, cols]`, zero padded.
#[derive(Debug, Clone, PartialEq)]
pub struct OptInfo {
    pub slope: Array4<f32>,
    pub sigslope: Array4<f32>,
    pub var_poisson: Array4<f32>,
    pub var_rnoise: Array4<f32>,
    pub yint: Array4<f32>,
    pub sigyint: Array4<f32>,
    pub weights: Array4<f32>,
    /// `[nints, rows, cols]`
    pub pedestal: Array3<f32>,
    /// `[nints, max_jumps, rows, cols]`
    pub crmag: Array4<f32>,
}

impl OptInfo {
    pub fn zeros(
        nints: usize,
        max_segments: usize,
        max_jumps: usize,
        rows: usize,
        cols: usize,
    ) -> Self {
        let seg = (nints, max_segments, rows, cols);
        Self {
            slope: Array4::zeros(seg),
            sigslope: Array4::zeros(seg),
            var_poisson: Array4::zeros(seg),
            var_rnoise: Array4::zeros(seg),
            yint: Array4::zeros(seg),
            sigyint: Array4::zeros(seg),
            weights: Array4::zeros(seg),
            pedestal: Array3::zeros((nints, rows, cols)),
            crmag: Array4::zeros((nints, max_jumps, rows, cols)),
        }
    }

    pub fn max_segments(&self) -> usize {
        self.slope.dim().1
    }

    pub fn max_jumps(&self) -> usize {
        self.crmag.dim().1
    }

    fn set(&mut self, row: usize, col: usize, integrations: &[IntegrationSegments]) {
        for (int, products) in integrations.iter().enumerate() {
            for (k, fit) in products.fits.iter().enumerate() {
                let idx = (int, k, row, col);
                self.slope[idx] = fit.slope;
                self.sigslope[idx] = fit.sigma();
                self.var_poisson[idx] = fit.var_poisson;
                self.var_rnoise[idx] = fit.var_rnoise;
                self.yint[idx] = fit.intercept;
                self.sigyint[idx] = fit.sig_intercept;
                self.weights[idx] = fit.weight();
            }
            self.pedestal[(int, row, col)] = products.pedestal;
            for (k, &magnitude) in products.crmag.iter().enumerate() {
                self.crmag[(int, k, row, col)] = magnitude;
            }
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct RampFitOutput {
    pub image: ImageInfo,
    pub integ: IntegInfo,
    pub opt: Option<OptInfo>,
}

/// Optional products of one pixel, kept sparse until the padded size is known.
#[derive(Debug, Clone, PartialEq)]
struct PixelSegments {
    row: usize,
    col: usize,
    integrations: Vec<IntegrationSegments>,
}

/// Results of one section, rows relative to the section start.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SectionOutput {
    pub section: Section,
    pub image: ImageInfo,
    pub integ: IntegInfo,
    opt: Option<Vec<PixelSegments>>,
    max_segments: usize,
    max_jumps: usize,
}

impl SectionOutput {
    pub fn new(section: Section, nints: usize, cols: usize, save_opt: bool) -> Self {
        Self {
            section,
            image: ImageInfo::zeros(section.rows(), cols),
            integ: IntegInfo::zeros(nints, section.rows(), cols),
            opt: save_opt.then(Vec::new),
            max_segments: 0,
            max_jumps: 0,
        }
    }

    /// Store the fit of the pixel at section-relative `(row, col)`.
    pub fn record(&mut self, row: usize, col: usize, fit: PixelFit) {
        self.image.set((row, col), &fit.exposure, fit.image_dq());
        for (int, result) in fit.integrations.iter().enumerate() {
            self.integ.set((int, row, col), result, fit.integration_dq(int));
        }

        if let (Some(opt), Some(integrations)) = (self.opt.as_mut(), fit.segments) {
            for products in &integrations {
                self.max_segments = self.max_segments.max(products.fits.len());
                self.max_jumps = self.max_jumps.max(products.crmag.len());
            }
            opt.push(PixelSegments {
                row,
                col,
                integrations,
            });
        }
    }

    /// Pixels of the exposure result carrying `flag`.
    pub fn count_flagged(&self, flag: u32) -> usize {
        self.image.dq.iter().filter(|&&dq| dq & flag != 0).count()
    }
}

/// Stitch section results, ordered by section index, into full-frame products.
pub(crate) fn assemble(
    sections: Vec<SectionOutput>,
    nints: usize,
    rows: usize,
    cols: usize,
    save_opt: bool,
) -> RampFitOutput {
    let mut image = ImageInfo::zeros(rows, cols);
    let mut integ = IntegInfo::zeros(nints, rows, cols);

    let mut opt = save_opt.then(|| {
        let max_segments = sections.iter().map(|s| s.max_segments).max().unwrap_or(0);
        let max_jumps = sections.iter().map(|s| s.max_jumps).max().unwrap_or(0);
        // Keep at least one plane.
        OptInfo::zeros(nints, max_segments.max(1), max_jumps.max(1), rows, cols)
    });

    for part in sections {
        let row_start = part.section.row_start;
        image.assign_rows(row_start, &part.image);
        integ.assign_rows(row_start, &part.integ);

        if let (Some(opt), Some(pixels)) = (opt.as_mut(), part.opt) {
            for pixel in pixels {
                opt.set(row_start + pixel.row, pixel.col, &pixel.integrations);
            }
        }
    }

    RampFitOutput { image, integ, opt }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::SegmentFit;

    fn result(slope: f32, flags: u32) -> RampResult {
        RampResult {
            slope,
            variance: 4.0,
            var_poisson: 1.0,
            var_rnoise: 3.0,
            flags,
        }
    }

    fn pixel_fit(slope: f32, nints: usize, segments: usize) -> PixelFit {
        let fit = SegmentFit {
            slope,
            variance: 0.5,
            var_poisson: 0.25,
            var_rnoise: 0.25,
            samples: 3,
            intercept: 7.0,
            sig_intercept: 1.5,
        };
        PixelFit {
            exposure: result(slope, 0),
            integrations: vec![result(slope, 4); nints],
            pixel_dq: 8,
            segments: Some(vec![
                IntegrationSegments {
                    fits: vec![fit; segments],
                    pedestal: 2.0,
                    crmag: vec![9.0; segments - 1],
                };
                nints
            ]),
        }
    }

    fn section(index: usize, row_start: usize, row_end: usize) -> Section {
        Section {
            index,
            row_start,
            row_end,
        }
    }

    #[test]
    fn test_record_sets_every_plane() {
        let mut out = SectionOutput::new(section(0, 0, 1), 2, 2, false);
        out.record(0, 1, pixel_fit(3.0, 2, 1));

        assert_eq!(out.image.slope[(0, 1)], 3.0);
        assert_eq!(out.image.dq[(0, 1)], 8);
        assert_eq!(out.image.variance[(0, 1)], 4.0);
        assert_eq!(out.image.err[(0, 1)], 2.0);
        assert_eq!(out.integ.dq[(1, 0, 1)], 12);
        assert_eq!(out.count_flagged(8), 1);
    }

    #[test]
    fn test_assemble_places_sections_by_row() {
        let mut first = SectionOutput::new(section(0, 0, 2), 1, 2, false);
        let mut second = SectionOutput::new(section(1, 2, 3), 1, 2, false);
        first.record(1, 0, pixel_fit(1.0, 1, 1));
        second.record(0, 1, pixel_fit(2.0, 1, 1));

        let out = assemble(vec![first, second], 1, 3, 2, false);
        assert_eq!(out.image.slope[(1, 0)], 1.0);
        assert_eq!(out.image.slope[(2, 1)], 2.0);
        assert_eq!(out.integ.slope[(0, 2, 1)], 2.0);
        assert_eq!(out.image.slope[(0, 0)], 0.0);
        assert!(out.opt.is_none());
    }

    #[test]
    fn test_optional_products_pad_to_global_maximum() {
        let mut first = SectionOutput::new(section(0, 0, 1), 1, 1, true);
        let mut second = SectionOutput::new(section(1, 1, 2), 1, 1, true);
        first.record(0, 0, pixel_fit(1.0, 1, 1));
        second.record(0, 0, pixel_fit(2.0, 1, 3));

        let out = assemble(vec![first, second], 1, 2, 1, true);
        let opt = out.opt.unwrap();
        assert_eq!(opt.max_segments(), 3);
        assert_eq!(opt.max_jumps(), 2);

        assert_eq!(opt.slope[(0, 0, 0, 0)], 1.0);
        assert_eq!(opt.slope[(0, 1, 0, 0)], 0.0);
        assert_eq!(opt.slope[(0, 2, 1, 0)], 2.0);
        assert_eq!(opt.weights[(0, 2, 1, 0)], 2.0);
        assert_eq!(opt.yint[(0, 0, 1, 0)], 7.0);
        assert_eq!(opt.sigyint[(0, 0, 1, 0)], 1.5);
        assert_eq!(opt.pedestal[(0, 1, 0)], 2.0);
        assert_eq!(opt.crmag[(0, 1, 1, 0)], 9.0);
        assert_eq!(opt.crmag[(0, 0, 0, 0)], 0.0);
    }

    #[test]
    fn test_optional_products_never_empty() {
        let mut only = SectionOutput::new(section(0, 0, 1), 1, 1, true);
        let mut fit = pixel_fit(1.0, 1, 1);
        fit.segments = Some(vec![IntegrationSegments::default()]);
        only.record(0, 0, fit);

        let opt = assemble(vec![only], 1, 1, 1, true).opt.unwrap();
        assert_eq!(opt.max_segments(), 1);
        assert_eq!(opt.max_jumps(), 1);
    }
}
