use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::distributions::{DistributionDescriptor, DEFAULT_HOCKEY_STICK_PERCENTILE};
use crate::dose_response::ModelKind;
use crate::monte_carlo::{percentile_key, SimulationResult};
use crate::pathogens::normalize_name;
use crate::statistics::{percentile_sorted, SummaryStatistics};
use crate::{QmraError, Result};

fn default_route() -> String {
    "ingestion".to_string()
}

/// One row of the scenario input table. Volumes are in millilitres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub scenario_id: String,
    #[serde(default)]
    pub scenario_name: String,
    #[serde(alias = "pathogen")]
    pub pathogen_ref: String,
    /// `None` means the exposure is undiluted.
    #[serde(default, alias = "location")]
    pub location_ref: Option<String>,
    #[serde(default = "default_route")]
    pub exposure_route: String,
    #[serde(default, alias = "treatment_LRV")]
    pub treatment_lrv: f64,
    #[serde(default, alias = "treatment_LRV_uncertainty")]
    pub treatment_lrv_uncertainty: f64,
    #[serde(alias = "volume_ml")]
    pub volume: f64,
    #[serde(default)]
    pub volume_min: Option<f64>,
    #[serde(default)]
    pub volume_max: Option<f64>,
    #[serde(alias = "frequency")]
    pub frequency_per_year: f64,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub iteration_count: Option<usize>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Overrides the pathogen's default dose-response model.
    #[serde(default, alias = "dose_response_model")]
    pub model: Option<ModelKind>,
}

impl ScenarioRecord {
    pub fn new(
        scenario_id: impl Into<String>,
        pathogen_ref: impl Into<String>,
        volume: f64,
        frequency_per_year: f64,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            scenario_name: String::new(),
            pathogen_ref: pathogen_ref.into(),
            location_ref: None,
            exposure_route: default_route(),
            treatment_lrv: 0.0,
            treatment_lrv_uncertainty: 0.0,
            volume,
            volume_min: None,
            volume_max: None,
            frequency_per_year,
            population: 0,
            iteration_count: None,
            priority: None,
            model: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location_ref = Some(location.into());
        self
    }

    pub fn with_treatment(mut self, lrv: f64, uncertainty: f64) -> Self {
        self.treatment_lrv = lrv;
        self.treatment_lrv_uncertainty = uncertainty;
        self
    }

    pub fn with_population(mut self, population: u64) -> Self {
        self.population = population;
        self
    }

    fn fail(&self, reason: impl Into<String>) -> QmraError {
        QmraError::ScenarioResolution {
            scenario_id: self.scenario_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scenario_id.trim().is_empty() {
            return Err(QmraError::invalid("scenario", "scenario_id must not be empty"));
        }
        if self.pathogen_ref.trim().is_empty() {
            return Err(self.fail("pathogen_ref must not be empty"));
        }
        if !(self.treatment_lrv >= 0.0 && self.treatment_lrv.is_finite()) {
            return Err(self.fail("treatment LRV must be finite and >= 0"));
        }
        if !(self.treatment_lrv_uncertainty >= 0.0 && self.treatment_lrv_uncertainty.is_finite()) {
            return Err(self.fail("treatment LRV uncertainty must be finite and >= 0"));
        }
        if !(self.volume > 0.0 && self.volume.is_finite()) {
            return Err(self.fail("volume must be finite and > 0"));
        }
        if let (Some(lo), Some(hi)) = (self.volume_min, self.volume_max) {
            if !(lo > 0.0 && lo <= hi && hi.is_finite()) {
                return Err(self.fail("volume bounds must satisfy 0 < volume_min <= volume_max"));
            }
        }
        if !(self.frequency_per_year >= 0.0 && self.frequency_per_year.is_finite()) {
            return Err(self.fail("frequency_per_year must be finite and >= 0"));
        }
        if self.iteration_count == Some(0) {
            return Err(self.fail("iteration_count must be > 0"));
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        if self.scenario_name.is_empty() {
            &self.scenario_id
        } else {
            &self.scenario_name
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compliance {
    #[serde(rename = "COMPLIANT")]
    Compliant,
    #[serde(rename = "NON-COMPLIANT")]
    NonCompliant,
}

impl Compliance {
    /// `Compliant` iff `annual_risk <= threshold`; NaN is never compliant.
    pub fn classify(annual_risk: f64, threshold: f64) -> Self {
        if annual_risk <= threshold {
            Compliance::Compliant
        } else {
            Compliance::NonCompliant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compliance::Compliant => "COMPLIANT",
            Compliance::NonCompliant => "NON-COMPLIANT",
        }
    }

    pub fn is_compliant(&self) -> bool {
        matches!(self, Compliance::Compliant)
    }
}

impl fmt::Display for Compliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics and percentiles of one simulated output variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    /// `(percentile, value)` pairs in ascending percentile order.
    pub percentiles: Vec<(f64, f64)>,
}

impl OutcomeSummary {
    const STATISTICS: [&'static str; 8] = [
        "mean", "median", "std", "variance", "min", "max", "skewness", "kurtosis",
    ];

    /// Every statistic is NaN when the run produced no finite output.
    pub fn from_result(result: &SimulationResult, percentiles: &[f64]) -> Self {
        let stats = result.statistics.as_ref();
        let stat = |f: fn(&SummaryStatistics) -> f64| stats.map_or(f64::NAN, f);
        Self {
            mean: stat(|s| s.mean),
            median: stat(|s| s.median),
            std: stat(|s| s.std),
            variance: stat(|s| s.variance),
            min: stat(|s| s.min),
            max: stat(|s| s.max),
            skewness: stat(|s| s.skewness),
            kurtosis: stat(|s| s.kurtosis),
            percentiles: percentiles
                .iter()
                .map(|&p| (p, result.percentile(p)))
                .collect(),
        }
    }

    /// Value at percentile `p`, NaN when `p` was not reported.
    pub fn percentile(&self, p: f64) -> f64 {
        self.percentiles
            .iter()
            .find(|(q, _)| *q == p)
            .map_or(f64::NAN, |&(_, v)| v)
    }

    fn column_names(&self, prefix: &str) -> Vec<String> {
        Self::STATISTICS
            .iter()
            .map(|stat| format!("{prefix}_{stat}"))
            .chain(
                self.percentiles
                    .iter()
                    .map(|&(p, _)| format!("{prefix}_{}", percentile_key(p))),
            )
            .collect()
    }

    fn values(&self) -> Vec<f64> {
        [
            self.mean,
            self.median,
            self.std,
            self.variance,
            self.min,
            self.max,
            self.skewness,
            self.kurtosis,
        ]
        .into_iter()
        .chain(self.percentiles.iter().map(|&(_, v)| v))
        .collect()
    }
}

/// One row of the output table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub pathogen: String,
    pub model: ModelKind,
    pub exposure_route: String,
    pub location: Option<String>,
    pub priority: Option<String>,
    pub iterations: usize,
    pub seed: u64,
    pub infection: OutcomeSummary,
    pub illness: OutcomeSummary,
    pub annual_risk_median: f64,
    pub annual_risk_p5: f64,
    pub annual_risk_p95: f64,
    pub annual_illness_median: f64,
    pub dalys_per_person_year: f64,
    pub population: u64,
    pub population_impact: u64,
    pub threshold: f64,
    pub compliance: Compliance,
}

impl ScenarioResult {
    /// Flat CSV header. Infection and illness contribute one column per
    /// statistic and per reported percentile, e.g. `infection_p97.5`.
    pub fn csv_header(&self) -> Vec<String> {
        let mut header: Vec<String> = [
            "scenario_id",
            "scenario_name",
            "pathogen",
            "model",
            "exposure_route",
            "location",
            "priority",
            "iterations",
            "seed",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        header.extend(self.infection.column_names("infection"));
        header.extend(self.illness.column_names("illness"));
        header.extend(
            [
                "annual_risk_median",
                "annual_risk_p5",
                "annual_risk_p95",
                "annual_illness_median",
                "dalys_per_person_year",
                "population",
                "population_impact",
                "threshold",
                "compliance",
            ]
            .iter()
            .map(|c| c.to_string()),
        );
        header
    }

    /// Values in [`csv_header`](Self::csv_header) order.
    pub fn csv_record(&self) -> Vec<String> {
        let mut record = vec![
            self.scenario_id.clone(),
            self.scenario_name.clone(),
            self.pathogen.clone(),
            self.model.to_string(),
            self.exposure_route.clone(),
            self.location.clone().unwrap_or_default(),
            self.priority.clone().unwrap_or_default(),
            self.iterations.to_string(),
            self.seed.to_string(),
        ];
        record.extend(self.infection.values().iter().map(f64::to_string));
        record.extend(self.illness.values().iter().map(f64::to_string));
        record.extend([
            self.annual_risk_median.to_string(),
            self.annual_risk_p5.to_string(),
            self.annual_risk_p95.to_string(),
            self.annual_illness_median.to_string(),
            self.dalys_per_person_year.to_string(),
            self.population.to_string(),
            self.population_impact.to_string(),
            self.threshold.to_string(),
            self.compliance.to_string(),
        ]);
        record
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DilutionRow {
    pub location: String,
    #[serde(alias = "dilution")]
    pub dilution_factor: f64,
}

/// Raw dilution observations grouped by normalized location name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DilutionTable {
    locations: BTreeMap<String, Vec<f64>>,
}

impl DilutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = DilutionRow>) -> Result<Self> {
        let mut table = Self::new();
        for row in rows {
            table.push(&row.location, row.dilution_factor)?;
        }
        Ok(table)
    }

    pub fn push(&mut self, location: &str, dilution_factor: f64) -> Result<()> {
        if !(dilution_factor > 0.0 && dilution_factor.is_finite()) {
            return Err(QmraError::invalid(
                format!("dilution at '{location}'"),
                format!("dilution factor must be finite and > 0, got {dilution_factor}"),
            ));
        }
        self.locations
            .entry(normalize_name(location))
            .or_default()
            .push(dilution_factor);
        Ok(())
    }

    pub fn observations(&self, location: &str) -> Option<&[f64]> {
        self.locations.get(&normalize_name(location)).map(Vec::as_slice)
    }

    pub fn median(&self, location: &str) -> Option<f64> {
        let mut sorted = self.observations(location)?.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(percentile_sorted(&sorted, 50.0))
    }

    pub fn locations(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// How raw (pre-treatment) pathogen concentration is described for a pathogen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConcentrationSource {
    HockeyStick {
        x_min: f64,
        x_median: f64,
        x_max: f64,
        #[serde(default = "default_percentile")]
        percentile: f64,
    },
    /// Lognormal centred on `concentration`; `cv = 0` is a point value.
    Fixed {
        concentration: f64,
        #[serde(default)]
        cv: f64,
    },
}

fn default_percentile() -> f64 {
    DEFAULT_HOCKEY_STICK_PERCENTILE
}

impl ConcentrationSource {
    pub fn descriptor(&self, name: &str) -> Result<DistributionDescriptor> {
        match *self {
            ConcentrationSource::HockeyStick {
                x_min,
                x_median,
                x_max,
                percentile,
            } => DistributionDescriptor::hockey_stick(name, x_min, x_median, x_max, percentile),
            ConcentrationSource::Fixed { concentration, cv } => {
                DistributionDescriptor::lognormal_from_median_cv(name, concentration, cv)
            }
        }
    }
}

/// Flat CSV form of a concentration table entry. Hockey-stick columns take
/// precedence when all three are present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationRow {
    pub pathogen: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub median: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub concentration: Option<f64>,
    #[serde(default)]
    pub cv: Option<f64>,
}

impl TryFrom<ConcentrationRow> for ConcentrationSource {
    type Error = QmraError;

    fn try_from(row: ConcentrationRow) -> Result<Self> {
        let source = match (row.min, row.median, row.max, row.concentration) {
            (Some(x_min), Some(x_median), Some(x_max), _) => ConcentrationSource::HockeyStick {
                x_min,
                x_median,
                x_max,
                percentile: row.percentile.unwrap_or(DEFAULT_HOCKEY_STICK_PERCENTILE),
            },
            (_, _, _, Some(concentration)) => ConcentrationSource::Fixed {
                concentration,
                cv: row.cv.unwrap_or(0.0),
            },
            _ => {
                return Err(QmraError::invalid(
                    format!("concentration for '{}'", row.pathogen),
                    "needs min/median/max or a fixed concentration",
                ))
            }
        };
        // surface parameter errors at load time
        source.descriptor("concentration")?;
        Ok(source)
    }
}

/// Raw concentration description per pathogen.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConcentrationTable {
    sources: BTreeMap<String, ConcentrationSource>,
}

impl ConcentrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = ConcentrationRow>) -> Result<Self> {
        let mut table = Self::new();
        for row in rows {
            let pathogen = row.pathogen.clone();
            table.insert(&pathogen, ConcentrationSource::try_from(row)?);
        }
        Ok(table)
    }

    pub fn insert(&mut self, pathogen: &str, source: ConcentrationSource) {
        self.sources.insert(normalize_name(pathogen), source);
    }

    pub fn get(&self, pathogen: &str) -> Option<&ConcentrationSource> {
        self.sources.get(&normalize_name(pathogen))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
