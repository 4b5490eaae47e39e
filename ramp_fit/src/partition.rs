//! Row-band partitioning of the pixel grid and section scheduling.
//!
//! Sections are whole-row bands so each one stays contiguous in row-major
//! order. Results come back ordered by section index regardless of how many
//! workers ran them.

use std::ops::Range;

use rayon::prelude::*;

use crate::error::Error;

/// Minimum number of rows in a section.
pub const MIN_SECTION_ROWS: usize = 1;

/// A band of rows `[row_start, row_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub index: usize,
    pub row_start: usize,
    pub row_end: usize,
}

impl Section {
    #[inline]
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    #[inline]
    pub fn row_range(&self) -> Range<usize> {
        self.row_start..self.row_end
    }
}

/// Rows that fit in `buffer_size` bytes of ramp data.
///
/// Uses checked arithmetic so a pathologically large cube falls back to the
/// minimum instead of overflowing.
pub fn rows_per_section(buffer_size: usize, nints: usize, ngroups: usize, ncols: usize) -> usize {
    let bytes_per_row = nints
        .checked_mul(ngroups)
        .and_then(|v| v.checked_mul(ncols))
        .and_then(|v| v.checked_mul(std::mem::size_of::<f32>()))
        .unwrap_or(usize::MAX);

    if bytes_per_row == 0 {
        return MIN_SECTION_ROWS;
    }
    (buffer_size / bytes_per_row).max(MIN_SECTION_ROWS)
}

/// Splits `nrows` rows into sections and runs a closure per section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartitioner {
    nrows: usize,
    rows_per_section: usize,
}

impl WorkPartitioner {
    pub fn new(nrows: usize, rows_per_section: usize) -> Self {
        Self {
            nrows,
            rows_per_section: rows_per_section.max(MIN_SECTION_ROWS),
        }
    }

    /// Partition a `[nints, ngroups, nrows, ncols]` cube under a byte budget.
    pub fn for_ramp(shape: [usize; 4], buffer_size: usize) -> Self {
        let [nints, ngroups, nrows, ncols] = shape;
        Self::new(nrows, rows_per_section(buffer_size, nints, ngroups, ncols))
    }

    pub fn rows_per_section(&self) -> usize {
        self.rows_per_section
    }

    pub fn section_count(&self) -> usize {
        self.nrows.div_ceil(self.rows_per_section)
    }

    pub fn sections(&self) -> Vec<Section> {
        (0..self.section_count())
            .map(|index| {
                let row_start = index * self.rows_per_section;
                Section {
                    index,
                    row_start,
                    row_end: (row_start + self.rows_per_section).min(self.nrows),
                }
            })
            .collect()
    }

    /// Run `f` on every section with at most `workers` threads.
    ///
    /// The returned vector is indexed by section. With one worker, or a single
    /// section, everything runs on the calling thread; otherwise a dedicated
    /// pool is built for this call.
    pub fn run<R, F>(&self, workers: usize, f: F) -> Result<Vec<R>, Error>
    where
        R: Send,
        F: Fn(Section) -> R + Sync,
    {
        let sections = self.sections();
        let workers = workers.max(1).min(sections.len().max(1));

        tracing::info!(
            nrows = self.nrows,
            rows_per_section = self.rows_per_section,
            sections = sections.len(),
            workers,
            "Partitioned pixel grid"
        );

        if workers == 1 {
            return Ok(sections.into_iter().map(f).collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ramp-fit-{i}"))
            .build()
            .map_err(|source| Error::WorkerPool { workers, source })?;

        Ok(pool.install(|| sections.into_par_iter().map(&f).collect()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_rows_per_section_budget() {
        // 2 ints * 10 groups * 100 cols * 4 bytes = 8000 bytes per row.
        assert_eq!(rows_per_section(80_000, 2, 10, 100), 10);
        assert_eq!(rows_per_section(79_999, 2, 10, 100), 9);
        assert_eq!(rows_per_section(100, 2, 10, 100), 1);
        assert_eq!(rows_per_section(0, 2, 10, 100), 1);
    }

    #[test]
    fn test_rows_per_section_degenerate() {
        assert_eq!(rows_per_section(1 << 20, 0, 10, 100), MIN_SECTION_ROWS);
        assert_eq!(
            rows_per_section(usize::MAX, usize::MAX, 2, 2),
            MIN_SECTION_ROWS
        );
    }

    #[test]
    fn test_sections_cover_rows_once() {
        let partitioner = WorkPartitioner::new(10, 3);
        let sections = partitioner.sections();
        assert_eq!(sections.len(), 4);
        assert_eq!(partitioner.section_count(), 4);

        let mut next = 0;
        for (i, section) in sections.iter().enumerate() {
            assert_eq!(section.index, i);
            assert_eq!(section.row_start, next);
            assert!(section.rows() >= 1);
            next = section.row_end;
        }
        assert_eq!(next, 10);
        assert_eq!(sections[3].rows(), 1);
    }

    #[test]
    fn test_for_ramp_uses_buffer_size() {
        let partitioner = WorkPartitioner::for_ramp([1, 4, 32, 16], 4 * 16 * 4 * 5);
        assert_eq!(partitioner.rows_per_section(), 5);
        assert_eq!(partitioner.section_count(), 7);
    }

    #[test]
    fn test_no_rows_no_sections() {
        let partitioner = WorkPartitioner::new(0, 4);
        assert!(partitioner.sections().is_empty());
        let out: Vec<usize> = partitioner.run(4, |s| s.index).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_run_preserves_section_order() {
        let partitioner = WorkPartitioner::new(37, 2);
        let expected: Vec<_> = partitioner.sections();
        for workers in [1, 2, 3, 8] {
            let out = partitioner.run(workers, |s| s).unwrap();
            assert_eq!(out, expected, "workers = {workers}");
        }
    }

    #[test]
    fn test_run_visits_every_section_once() {
        let partitioner = WorkPartitioner::new(20, 1);
        let calls = AtomicUsize::new(0);
        let rows: usize = partitioner
            .run(4, |s| {
                calls.fetch_add(1, Ordering::Relaxed);
                s.rows()
            })
            .unwrap()
            .into_iter()
            .sum();
        assert_eq!(rows, 20);
        assert_eq!(calls.load(Ordering::Relaxed), 20);
    }
}
