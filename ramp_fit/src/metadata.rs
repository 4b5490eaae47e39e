//! Exposure metadata and group timing models.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Read-only scalar description of the exposure readout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMetadata {
    /// Instrument name, used to pick a weighting exponent table.
    pub instrument: String,
    /// Seconds between frame reads.
    pub frame_time: f64,
    /// Seconds between group starts.
    pub group_time: f64,
    /// Frames dropped between groups.
    pub groupgap: u32,
    /// Frames averaged into each group.
    pub nframes: u32,
    /// Frames dropped before the first group.
    pub drop_frames1: u32,
    /// Groups per integration.
    pub ngroups: usize,
}

impl ExposureMetadata {
    /// Reject metadata that makes the timing math meaningless.
    pub fn validate(&self) -> Result<(), Error> {
        if self.nframes == 0 {
            return Err(Error::InvalidMetadata {
                field: "nframes",
                value: self.nframes.to_string(),
            });
        }
        if self.ngroups == 0 {
            return Err(Error::InvalidMetadata {
                field: "ngroups",
                value: self.ngroups.to_string(),
            });
        }
        if !(self.frame_time.is_finite() && self.frame_time > 0.0) {
            return Err(Error::InvalidMetadata {
                field: "frame_time",
                value: self.frame_time.to_string(),
            });
        }
        if !(self.group_time.is_finite() && self.group_time > 0.0) {
            return Err(Error::InvalidMetadata {
                field: "group_time",
                value: self.group_time.to_string(),
            });
        }
        Ok(())
    }

    /// Time from reset to the mid-point of the first group's frames.
    pub fn pedestal_time(&self) -> f64 {
        self.frame_time * (self.nframes as f64 + 1.0) / 2.0
    }
}

/// Maps a group index to its effective sample time.
///
/// Only time differences enter the slope, so the origin is arbitrary.
pub trait GroupTiming: Send + Sync {
    fn time_of(&self, group: usize) -> f64;

    /// Sample times of the first `ngroups` groups.
    fn sample_times(&self, ngroups: usize) -> Vec<f64> {
        (0..ngroups).map(|g| self.time_of(g)).collect()
    }
}

/// Groups evenly spaced by `group_time`, group 0 at `t = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupTimeSpacing {
    pub group_time: f64,
}

impl GroupTimeSpacing {
    pub fn from_metadata(meta: &ExposureMetadata) -> Self {
        Self {
            group_time: meta.group_time,
        }
    }
}

impl GroupTiming for GroupTimeSpacing {
    #[inline]
    fn time_of(&self, group: usize) -> f64 {
        group as f64 * self.group_time
    }
}

/// Group time taken as the mean read time of its averaged frames,
/// accounting for dropped leading frames and inter-group gaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAveragedTiming {
    pub frame_time: f64,
    pub nframes: u32,
    pub groupgap: u32,
    pub drop_frames1: u32,
}

impl FrameAveragedTiming {
    pub fn from_metadata(meta: &ExposureMetadata) -> Self {
        Self {
            frame_time: meta.frame_time,
            nframes: meta.nframes,
            groupgap: meta.groupgap,
            drop_frames1: meta.drop_frames1,
        }
    }
}

impl GroupTiming for FrameAveragedTiming {
    fn time_of(&self, group: usize) -> f64 {
        let frames_per_group = (self.nframes + self.groupgap) as f64;
        let mean_frame = (self.nframes as f64 + 1.0) / 2.0;
        self.frame_time * (self.drop_frames1 as f64 + group as f64 * frames_per_group + mean_frame)
    }
}
