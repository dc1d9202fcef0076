use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::monte_carlo::fnv1a;
use crate::statistics::DEFAULT_PERCENTILES;
use crate::{QmraError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Every scenario uses the global seed.
    #[default]
    Fixed,
    /// Each scenario derives its own seed from the global seed and its id.
    PerScenario,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DilutionMode {
    /// Empirical CDF over every observation for the location.
    #[default]
    FullEcdf,
    /// Narrow lognormal around the location's median dilution.
    MedianOnly,
}

/// Batch settings. Absent or null fields take the value from
/// [`BatchConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BatchConfigFile")]
pub struct BatchConfig {
    pub compliance_threshold: f64,
    pub default_iterations: usize,
    pub seed: u64,
    pub seed_policy: SeedPolicy,
    pub dilution_mode: DilutionMode,
    pub median_dilution_cv: f64,
    /// Half-width of the uniform volume distribution as a fraction of the
    /// nominal volume.
    pub volume_variability: f64,
    pub fail_fast: bool,
    pub percentiles: Vec<f64>,
    pub parallel: bool,
}

/// On-disk form of [`BatchConfig`]. Fields whose type default matches the
/// batch default use `DefaultOnNull`; the rest stay optional.
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatchConfigFile {
    compliance_threshold: Option<f64>,
    default_iterations: Option<usize>,
    seed: Option<u64>,
    #[serde_as(as = "DefaultOnNull")]
    seed_policy: SeedPolicy,
    #[serde_as(as = "DefaultOnNull")]
    dilution_mode: DilutionMode,
    median_dilution_cv: Option<f64>,
    volume_variability: Option<f64>,
    #[serde_as(as = "DefaultOnNull")]
    fail_fast: bool,
    percentiles: Option<Vec<f64>>,
    #[serde_as(as = "DefaultOnNull")]
    parallel: bool,
}

impl From<BatchConfigFile> for BatchConfig {
    fn from(file: BatchConfigFile) -> Self {
        let defaults = BatchConfig::default();
        Self {
            compliance_threshold: file
                .compliance_threshold
                .unwrap_or(defaults.compliance_threshold),
            default_iterations: file.default_iterations.unwrap_or(defaults.default_iterations),
            seed: file.seed.unwrap_or(defaults.seed),
            seed_policy: file.seed_policy,
            dilution_mode: file.dilution_mode,
            median_dilution_cv: file.median_dilution_cv.unwrap_or(defaults.median_dilution_cv),
            volume_variability: file.volume_variability.unwrap_or(defaults.volume_variability),
            fail_fast: file.fail_fast,
            percentiles: file.percentiles.unwrap_or(defaults.percentiles),
            parallel: file.parallel,
        }
    }
}

fn default_percentiles() -> Vec<f64> {
    DEFAULT_PERCENTILES.to_vec()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            compliance_threshold: 1.0e-4,
            default_iterations: 10_000,
            seed: 42,
            seed_policy: SeedPolicy::Fixed,
            dilution_mode: DilutionMode::FullEcdf,
            median_dilution_cv: 0.1,
            volume_variability: 0.3,
            fail_fast: false,
            percentiles: default_percentiles(),
            parallel: false,
        }
    }
}

impl BatchConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: BatchConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.compliance_threshold > 0.0 && self.compliance_threshold <= 1.0) {
            return Err(QmraError::InvalidConfig(
                "compliance_threshold must lie in (0, 1]".to_string(),
            ));
        }

        if self.default_iterations == 0 {
            return Err(QmraError::InvalidConfig(
                "default_iterations must be greater than zero".to_string(),
            ));
        }

        if !(self.median_dilution_cv >= 0.0 && self.median_dilution_cv.is_finite()) {
            return Err(QmraError::InvalidConfig(
                "median_dilution_cv must be finite and non-negative".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.volume_variability) {
            return Err(QmraError::InvalidConfig(
                "volume_variability must lie in [0, 1)".to_string(),
            ));
        }

        if self
            .percentiles
            .iter()
            .any(|p| !(0.0..=100.0).contains(p))
        {
            return Err(QmraError::InvalidConfig(
                "percentiles must lie in [0, 100]".to_string(),
            ));
        }

        Ok(())
    }

    /// Seed used for the scenario with the given id.
    pub fn scenario_seed(&self, scenario_id: &str) -> u64 {
        match self.seed_policy {
            SeedPolicy::Fixed => self.seed,
            SeedPolicy::PerScenario => self.seed ^ fnv1a(scenario_id),
        }
    }
}
