//! Data-quality flag mapping.
//!
//! The bit assignments are supplied by the caller as a name → bit map and
//! resolved once into an immutable [`DqFlags`] value that is passed down to
//! the segmenter and combiners.

use std::collections::BTreeMap;

use crate::error::Error;

pub const DO_NOT_USE: &str = "DO_NOT_USE";
pub const SATURATED: &str = "SATURATED";
pub const JUMP_DET: &str = "JUMP_DET";
pub const NO_GAIN_VALUE: &str = "NO_GAIN_VALUE";
pub const UNRELIABLE_SLOPE: &str = "UNRELIABLE_SLOPE";

/// Flag names that must be present in every mapping.
pub const REQUIRED_FLAGS: [&str; 5] = [
    DO_NOT_USE,
    SATURATED,
    JUMP_DET,
    NO_GAIN_VALUE,
    UNRELIABLE_SLOPE,
];

/// Resolved bit masks of the flags ramp fitting reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DqFlags {
    pub do_not_use: u32,
    pub saturated: u32,
    pub jump_det: u32,
    pub no_gain_value: u32,
    pub unreliable_slope: u32,
}

impl Default for DqFlags {
    fn default() -> Self {
        Self::JWST
    }
}

impl DqFlags {
    /// Bit assignments of the JWST calibration pipeline.
    pub const JWST: Self = Self {
        do_not_use: 1,
        saturated: 1 << 1,
        jump_det: 1 << 2,
        no_gain_value: 1 << 19,
        unreliable_slope: 1 << 24,
    };

    /// Resolve a name → bit mapping, failing on any missing or zero entry.
    ///
    /// Names outside [`REQUIRED_FLAGS`] are ignored.
    pub fn from_mapping(mapping: &BTreeMap<String, u32>) -> Result<Self, Error> {
        let lookup = |name: &'static str| -> Result<u32, Error> {
            match mapping.get(name) {
                None => Err(Error::MissingDqFlag(name)),
                Some(0) => Err(Error::ZeroDqFlag(name)),
                Some(&bit) => Ok(bit),
            }
        };

        Ok(Self {
            do_not_use: lookup(DO_NOT_USE)?,
            saturated: lookup(SATURATED)?,
            jump_det: lookup(JUMP_DET)?,
            no_gain_value: lookup(NO_GAIN_VALUE)?,
            unreliable_slope: lookup(UNRELIABLE_SLOPE)?,
        })
    }

    /// The mapping that resolves to [`DqFlags::JWST`].
    pub fn default_mapping() -> BTreeMap<String, u32> {
        Self::JWST.to_mapping()
    }

    pub fn to_mapping(&self) -> BTreeMap<String, u32> {
        [
            (DO_NOT_USE, self.do_not_use),
            (SATURATED, self.saturated),
            (JUMP_DET, self.jump_det),
            (NO_GAIN_VALUE, self.no_gain_value),
            (UNRELIABLE_SLOPE, self.unreliable_slope),
        ]
        .into_iter()
        .map(|(name, bit)| (name.to_string(), bit))
        .collect()
    }

    /// Static pixel flags that skip fitting entirely.
    #[inline]
    pub fn short_circuit_mask(&self) -> u32 {
        self.no_gain_value | self.saturated
    }

    #[inline]
    pub fn is_do_not_use(&self, flags: u32) -> bool {
        flags & self.do_not_use != 0
    }

    #[inline]
    pub fn is_saturated(&self, flags: u32) -> bool {
        flags & self.saturated != 0
    }

    #[inline]
    pub fn is_jump(&self, flags: u32) -> bool {
        flags & self.jump_det != 0
    }

    /// A sample that can take part in a fit.
    #[inline]
    pub fn is_usable(&self, flags: u32) -> bool {
        flags & (self.do_not_use | self.saturated) == 0
    }
}
