//! Ramp fitting configuration.
//!
//! [`RampFitConfig`] is the user-facing, serde-loadable description of a run.
//! [`RampFitConfig::resolve`] checks it against the exposure metadata and
//! produces the immutable [`FitSettings`] the engine actually reads, so every
//! configuration error surfaces before the first pixel is fitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::dq::DqFlags;
use crate::error::Error;
use crate::metadata::ExposureMetadata;

/// Default section budget in bytes (300 MB).
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 300_000;

/// Slope fitting algorithm family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    /// Ordinary least squares over flagged segments.
    #[default]
    Ols,
    /// Generalized least squares. Not implemented; rejected by [`RampFitConfig::resolve`].
    Gls,
}

/// Per-sample weighting inside a segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Fixsen optimal weighting (SNR-dependent exponent).
    #[default]
    Optimal,
}

/// Coarse policy for how many CPU threads to fit with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MaxCores {
    /// Single worker.
    #[default]
    None,
    Quarter,
    Half,
    All,
}

impl MaxCores {
    /// Concrete worker count for `available` logical CPUs. Never zero.
    pub fn worker_count(self, available: usize) -> usize {
        let available = available.max(1);
        match self {
            MaxCores::None => 1,
            MaxCores::Quarter => (available / 4).max(1),
            MaxCores::Half => (available / 2).max(1),
            MaxCores::All => available,
        }
    }

    /// Worker count for the threads rayon sees on this machine.
    pub fn resolve(self) -> usize {
        self.worker_count(rayon::current_num_threads())
    }
}

/// One row of a [`PowerTable`]: segments with SNR below `snr_below` use `power`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerStep {
    pub snr_below: f64,
    pub power: f64,
}

/// Optimal-weighting exponent as a step function of segment SNR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerTable {
    /// Steps in ascending `snr_below` order.
    pub steps: Vec<PowerStep>,
    /// Exponent above the last step.
    pub max_power: f64,
}

impl Default for PowerTable {
    /// Fixsen et al. (2000) exponents.
    fn default() -> Self {
        let step = |snr_below, power| PowerStep { snr_below, power };
        Self {
            steps: vec![
                step(5.0, 0.0),
                step(10.0, 0.4),
                step(20.0, 1.0),
                step(50.0, 1.6),
                step(100.0, 2.2),
            ],
            max_power: 10.0,
        }
    }
}

impl PowerTable {
    /// Unweighted fitting regardless of SNR.
    pub fn uniform() -> Self {
        Self {
            steps: Vec::new(),
            max_power: 0.0,
        }
    }

    pub fn power(&self, snr: f64) -> f64 {
        self.steps
            .iter()
            .find(|step| snr < step.snr_below)
            .map_or(self.max_power, |step| step.power)
    }
}

/// Configuration of a ramp fitting run.
///
/// # Examples
///
/// ```ignore
/// use ramp_fit::{MaxCores, RampFitConfig};
///
/// let config = RampFitConfig {
///     max_cores: MaxCores::Half,
///     save_opt: true,
///     ..Default::default()
/// };
///
/// let config = RampFitConfig::from_yaml("algorithm: OLS\nmax_cores: all\n")?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampFitConfig {
    pub algorithm: Algorithm,
    pub weighting: Weighting,
    pub max_cores: MaxCores,
    /// Byte budget for the ramp data of one section.
    pub buffer_size: usize,
    /// Also produce per-segment products.
    pub save_opt: bool,
    /// DQ flag name → bit mapping.
    pub dq_flags: BTreeMap<String, u32>,
    /// Per-instrument weighting exponent tables (matched case-insensitively).
    pub power_tables: BTreeMap<String, PowerTable>,
}

impl Default for RampFitConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Ols,
            weighting: Weighting::Optimal,
            max_cores: MaxCores::None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            save_opt: false,
            dq_flags: DqFlags::default_mapping(),
            power_tables: BTreeMap::new(),
        }
    }
}

impl RampFitConfig {
    /// Parse a YAML document; missing keys take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn power_table_for(&self, instrument: &str) -> PowerTable {
        self.power_tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(instrument))
            .map(|(_, table)| table.clone())
            .unwrap_or_default()
    }

    /// Validate against the exposure and produce the settings the engine runs with.
    pub fn resolve(&self, meta: &ExposureMetadata) -> Result<FitSettings, Error> {
        match self.algorithm {
            Algorithm::Ols => {}
            Algorithm::Gls => return Err(Error::UnsupportedAlgorithm(Algorithm::Gls)),
        }
        meta.validate()?;

        let dq = DqFlags::from_mapping(&self.dq_flags)?;
        let workers = self.max_cores.resolve();

        tracing::debug!(
            algorithm = %self.algorithm,
            weighting = %self.weighting,
            max_cores = %self.max_cores,
            workers,
            instrument = %meta.instrument,
            "Resolved ramp fit configuration"
        );

        Ok(FitSettings {
            dq,
            power: self.power_table_for(&meta.instrument),
            workers,
            buffer_size: self.buffer_size,
            save_opt: self.save_opt,
        })
    }
}

/// Immutable, validated settings shared read-only by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSettings {
    pub dq: DqFlags,
    pub power: PowerTable,
    /// Concrete worker count, at least 1.
    pub workers: usize,
    pub buffer_size: usize,
    pub save_opt: bool,
}

impl FitSettings {
    /// Settings for direct use of the engine, bypassing [`RampFitConfig`].
    pub fn new(dq: DqFlags, workers: usize) -> Self {
        Self {
            dq,
            power: PowerTable::default(),
            workers: workers.max(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            save_opt: false,
        }
    }

    pub fn with_power(mut self, power: PowerTable) -> Self {
        self.power = power;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_save_opt(mut self, save_opt: bool) -> Self {
        self.save_opt = save_opt;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::dq::JUMP_DET;

    fn meta() -> ExposureMetadata {
        ExposureMetadata {
            instrument: "MIRI".to_string(),
            frame_time: 2.775,
            group_time: 2.775,
            groupgap: 0,
            nframes: 1,
            drop_frames1: 0,
            ngroups: 5,
        }
    }

    #[test]
    fn test_default_config() {
        let config = RampFitConfig::default();
        assert_eq!(config.algorithm, Algorithm::Ols);
        assert_eq!(config.weighting, Weighting::Optimal);
        assert_eq!(config.max_cores, MaxCores::None);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(!config.save_opt);
        assert_eq!(config.dq_flags.len(), 5);
    }

    #[test]
    fn test_max_cores_parse_and_display() {
        assert_eq!(MaxCores::from_str("none").unwrap(), MaxCores::None);
        assert_eq!(MaxCores::from_str("Quarter").unwrap(), MaxCores::Quarter);
        assert_eq!(MaxCores::from_str("HALF").unwrap(), MaxCores::Half);
        assert_eq!(MaxCores::from_str("all").unwrap(), MaxCores::All);
        assert!(MaxCores::from_str("most").is_err());
        assert_eq!(MaxCores::Half.to_string(), "half");
    }

    #[test]
    fn test_worker_count_policy() {
        assert_eq!(MaxCores::None.worker_count(16), 1);
        assert_eq!(MaxCores::Quarter.worker_count(16), 4);
        assert_eq!(MaxCores::Half.worker_count(16), 8);
        assert_eq!(MaxCores::All.worker_count(16), 16);

        // Small machines never drop to zero workers.
        assert_eq!(MaxCores::Quarter.worker_count(2), 1);
        assert_eq!(MaxCores::Half.worker_count(1), 1);
        assert_eq!(MaxCores::All.worker_count(0), 1);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(Algorithm::from_str("ols").unwrap(), Algorithm::Ols);
        assert_eq!(Algorithm::from_str("GLS").unwrap(), Algorithm::Gls);
        assert_eq!(Algorithm::Ols.to_string(), "OLS");
    }

    #[test]
    fn test_power_table_steps() {
        let table = PowerTable::default();
        assert_eq!(table.power(0.0), 0.0);
        assert_eq!(table.power(4.99), 0.0);
        assert_eq!(table.power(5.0), 0.4);
        assert_eq!(table.power(15.0), 1.0);
        assert_eq!(table.power(49.0), 1.6);
        assert_eq!(table.power(99.0), 2.2);
        assert_eq!(table.power(100.0), 10.0);
        assert_eq!(table.power(1.0e6), 10.0);
        assert_eq!(PowerTable::uniform().power(1.0e6), 0.0);
    }

    #[test]
    fn test_power_table_lookup_is_case_insensitive() {
        let mut config = RampFitConfig::default();
        config
            .power_tables
            .insert("miri".to_string(), PowerTable::uniform());
        assert_eq!(config.power_table_for("MIRI"), PowerTable::uniform());
        assert_eq!(config.power_table_for("NIRCAM"), PowerTable::default());
    }

    #[test]
    fn test_resolve_default() {
        let settings = RampFitConfig::default().resolve(&meta()).unwrap();
        assert_eq!(settings.dq, DqFlags::JWST);
        assert_eq!(settings.workers, 1);
        assert!(!settings.save_opt);
    }

    #[test]
    fn test_resolve_rejects_gls() {
        let config = RampFitConfig {
            algorithm: Algorithm::Gls,
            ..Default::default()
        };
        let err = config.resolve(&meta()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(Algorithm::Gls)));
    }

    #[test]
    fn test_resolve_rejects_missing_flag() {
        let mut config = RampFitConfig::default();
        config.dq_flags.remove(JUMP_DET);
        assert!(matches!(
            config.resolve(&meta()),
            Err(Error::MissingDqFlag(JUMP_DET))
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_metadata() {
        let bad = ExposureMetadata {
            nframes: 0,
            ..meta()
        };
        assert!(RampFitConfig::default().resolve(&bad).is_err());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = RampFitConfig::from_yaml(
            "algorithm: OLS\nmax_cores: half\nsave_opt: true\nbuffer_size: 1048576\n",
        )
        .unwrap();
        assert_eq!(config.max_cores, MaxCores::Half);
        assert!(config.save_opt);
        assert_eq!(config.buffer_size, 1_048_576);
        assert_eq!(config.dq_flags, DqFlags::default_mapping());
    }

    #[test]
    fn test_from_yaml_power_override() {
        let yaml = "\
power_tables:
  NIRSPEC:
    steps:
      - snr_below: 10.0
        power: 0.0
    max_power: 1.0
";
        let config = RampFitConfig::from_yaml(yaml).unwrap();
        let table = config.power_table_for("nirspec");
        assert_eq!(table.power(5.0), 0.0);
        assert_eq!(table.power(50.0), 1.0);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_policy() {
        assert!(RampFitConfig::from_yaml("max_cores: most\n").is_err());
    }
}
