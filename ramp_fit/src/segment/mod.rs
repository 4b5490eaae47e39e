//! Splitting a pixel ramp into clean segments.
//!
//! A segment is a maximal run of contiguous usable samples. Runs are broken by:
//!
//! - `JUMP_DET`: the run ends before the flagged sample, which starts the next run
//! - `SATURATED`: the run ends before the flagged sample and nothing after it is used
//! - `DO_NOT_USE`: the sample is skipped and the run ends before it
//!
//! Single-sample runs are still produced; the fitter turns them into
//! zero-weight placeholders.

use std::ops::Range;

use crate::dq::DqFlags;


/// Why a segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The next sample carries a jump and starts a new segment.
    Jump,
    /// The next sample is saturated; the rest of the integration is unusable.
    Saturated,
    /// The next sample is excluded.
    DoNotUse,
    /// The ramp ran out of samples.
    EndOfRamp,
}

/// A run of usable samples of one pixel in one integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub integration: usize,
    /// `(row, column)` of the pixel.
    pub pixel: (usize, usize),
    /// First sample index.
    pub start: usize,
    /// Number of samples, at least 1.
    pub len: usize,
    pub termination: Termination,
}

impl Segment {
    /// One past the last sample index.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Lazy iterator over the segments of one ramp. See [`segments`].
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    flags: &'a [u32],
    dq: DqFlags,
    integration: usize,
    pixel: (usize, usize),
    pos: usize,
    done: bool,
}

/// Segment the per-sample `flags` of one pixel and integration.
pub fn segments(
    flags: &[u32],
    dq: DqFlags,
    integration: usize,
    pixel: (usize, usize),
) -> Segments<'_> {
    Segments {
        flags,
        dq,
        integration,
        pixel,
        pos: 0,
        done: false,
    }
}

impl Segments<'_> {
    fn segment(&self, start: usize, termination: Termination) -> Segment {
        Segment {
            integration: self.integration,
            pixel: self.pixel,
            start,
            len: self.pos - start,
            termination,
        }
    }
}

impl Iterator for Segments<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.done {
            return None;
        }

        // Find the first sample of the next run.
        let start = loop {
            let Some(&flags) = self.flags.get(self.pos) else {
                self.done = true;
                return None;
            };
            if self.dq.is_saturated(flags) {
                self.done = true;
                return None;
            }
            self.pos += 1;
            if !self.dq.is_do_not_use(flags) {
                break self.pos - 1;
            }
        };

        while let Some(&flags) = self.flags.get(self.pos) {
            if self.dq.is_saturated(flags) {
                self.done = true;
                return Some(self.segment(start, Termination::Saturated));
            }
            if self.dq.is_do_not_use(flags) {
                let segment = self.segment(start, Termination::DoNotUse);
                self.pos += 1;
                return Some(segment);
            }
            if self.dq.is_jump(flags) {
                // The jump sample opens the next run.
                return Some(self.segment(start, Termination::Jump));
            }
            self.pos += 1;
        }

        self.done = true;
        Some(self.segment(start, Termination::EndOfRamp))
    }
}

impl std::iter::FusedIterator for Segments<'_> {}

/// Index of the first saturated sample, if any.
pub fn first_saturated(flags: &[u32], dq: DqFlags) -> Option<usize> {
    flags.iter().position(|&f| dq.is_saturated(f))
}
