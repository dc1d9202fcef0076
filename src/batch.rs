use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{BatchConfig, DilutionMode};
use crate::distributions::{DistributionDescriptor, EmpiricalCdf};
use crate::monte_carlo::{risk_fn, MonteCarloSimulator, SampledInputs};
use crate::pathogens::PathogenParameterStore;
use crate::scenario::{
    Compliance, ConcentrationTable, DilutionTable, OutcomeSummary, ScenarioRecord, ScenarioResult,
};
use crate::{QmraError, Result};

pub const CONCENTRATION: &str = "concentration";
pub const DILUTION: &str = "dilution";
pub const VOLUME: &str = "volume_ml";
pub const TREATMENT_LRV: &str = "treatment_lrv";
pub const INFECTION: &str = "infection_probability";
pub const ILLNESS: &str = "illness_probability";

/// Probability of at least one event in `frequency` independent exposures.
/// Exactly `p_event` when `frequency == 1`; zero for non-positive frequency.
pub fn annual_risk(p_event: f64, frequency: f64) -> f64 {
    if frequency == 1.0 {
        return p_event;
    }
    if frequency <= 0.0 {
        return 0.0;
    }
    -(frequency * (-p_event).ln_1p()).exp_m1()
}

#[derive(Debug)]
pub struct ScenarioFailure {
    /// Position of the scenario in the input.
    pub index: usize,
    pub scenario_id: String,
    pub error: QmraError,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub compliant: usize,
    pub non_compliant: usize,
    pub errored: usize,
}

/// Results in input order plus the scenarios that could not be evaluated.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<ScenarioResult>,
    pub failures: Vec<ScenarioFailure>,
}

impl BatchOutcome {
    pub fn summary(&self) -> BatchSummary {
        let compliant = self
            .results
            .iter()
            .filter(|r| r.compliance.is_compliant())
            .count();
        BatchSummary {
            total: self.results.len() + self.failures.len(),
            compliant,
            non_compliant: self.results.len() - compliant,
            errored: self.failures.len(),
        }
    }

    /// Copy of the results sorted by median annual risk, highest first.
    /// Ties keep input order and NaN risks sort last.
    pub fn ranked_by_annual_risk(&self) -> Vec<ScenarioResult> {
        let mut ranked = self.results.clone();
        ranked.sort_by(|a, b| {
            b.annual_risk_median
                .partial_cmp(&a.annual_risk_median)
                .unwrap_or_else(|| {
                    a.annual_risk_median
                        .is_nan()
                        .cmp(&b.annual_risk_median.is_nan())
                })
        });
        ranked
    }
}

pub struct BatchScenarioRunner {
    config: BatchConfig,
    pathogens: PathogenParameterStore,
    dilutions: DilutionTable,
    concentrations: ConcentrationTable,
}

impl BatchScenarioRunner {
    pub fn new(config: BatchConfig, pathogens: PathogenParameterStore) -> Self {
        Self {
            config,
            pathogens,
            dilutions: DilutionTable::default(),
            concentrations: ConcentrationTable::default(),
        }
    }

    pub fn with_dilutions(mut self, dilutions: DilutionTable) -> Self {
        self.dilutions = dilutions;
        self
    }

    pub fn with_concentrations(mut self, concentrations: ConcentrationTable) -> Self {
        self.concentrations = concentrations;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Evaluates every scenario. Failed scenarios are recorded and skipped
    /// unless `fail_fast` is set, in which case the first failure in input
    /// order is returned and no results are produced.
    pub fn run(&self, scenarios: &[ScenarioRecord]) -> Result<BatchOutcome> {
        info!(
            scenarios = scenarios.len(),
            parallel = self.config.parallel,
            threshold = self.config.compliance_threshold,
            "batch started"
        );

        let evaluated: Vec<Result<ScenarioResult>> = if self.config.parallel {
            scenarios.par_iter().map(|s| self.run_scenario(s)).collect()
        } else if self.config.fail_fast {
            let mut evaluated = Vec::with_capacity(scenarios.len());
            for scenario in scenarios {
                let result = self.run_scenario(scenario);
                let failed = result.is_err();
                evaluated.push(result);
                if failed {
                    break;
                }
            }
            evaluated
        } else {
            scenarios.iter().map(|s| self.run_scenario(s)).collect()
        };

        let mut outcome = BatchOutcome::default();
        for (index, (scenario, result)) in scenarios.iter().zip(evaluated).enumerate() {
            match result {
                Ok(result) => outcome.results.push(result),
                Err(err) if self.config.fail_fast => {
                    error!(scenario_id = %scenario.scenario_id, error = %err, "scenario failed, aborting batch");
                    return Err(err);
                }
                Err(err) => {
                    warn!(scenario_id = %scenario.scenario_id, error = %err, "scenario failed, continuing");
                    outcome.failures.push(ScenarioFailure {
                        index,
                        scenario_id: scenario.scenario_id.clone(),
                        error: err,
                    });
                }
            }
        }

        let summary = outcome.summary();
        info!(
            compliant = summary.compliant,
            non_compliant = summary.non_compliant,
            errored = summary.errored,
            "batch finished"
        );
        Ok(outcome)
    }

    fn resolution_error(scenario: &ScenarioRecord, reason: impl Into<String>) -> QmraError {
        QmraError::ScenarioResolution {
            scenario_id: scenario.scenario_id.clone(),
            reason: reason.into(),
        }
    }

    fn dilution_descriptor(&self, scenario: &ScenarioRecord) -> Result<Option<DistributionDescriptor>> {
        let Some(location) = scenario
            .location_ref
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        else {
            return Ok(None);
        };

        let observations = self.dilutions.observations(location).ok_or_else(|| {
            Self::resolution_error(scenario, format!("no dilution data for location '{location}'"))
        })?;

        let descriptor = match self.config.dilution_mode {
            DilutionMode::FullEcdf => {
                DistributionDescriptor::empirical(DILUTION, EmpiricalCdf::from_observations(observations)?)?
            }
            DilutionMode::MedianOnly => {
                let median = self.dilutions.median(location).unwrap_or(f64::NAN);
                DistributionDescriptor::lognormal_from_median_cv(
                    DILUTION,
                    median,
                    self.config.median_dilution_cv,
                )?
            }
        };
        Ok(Some(descriptor))
    }

    fn volume_descriptor(&self, scenario: &ScenarioRecord) -> Result<DistributionDescriptor> {
        let spread = self.config.volume_variability;
        let lo = scenario.volume_min.unwrap_or(scenario.volume * (1.0 - spread));
        let hi = scenario.volume_max.unwrap_or(scenario.volume * (1.0 + spread));
        if lo > hi {
            return Err(Self::resolution_error(
                scenario,
                format!("volume range [{lo}, {hi}] is empty"),
            ));
        }
        if lo == hi {
            DistributionDescriptor::normal(VOLUME, lo, 0.0)
        } else {
            DistributionDescriptor::uniform(VOLUME, lo, hi)
        }
    }

    pub fn run_scenario(&self, scenario: &ScenarioRecord) -> Result<ScenarioResult> {
        scenario.validate()?;

        let pathogen = self
            .pathogens
            .resolve(&scenario.pathogen_ref, scenario.model)
            .map_err(|err| Self::resolution_error(scenario, err.to_string()))?;
        if !self.pathogens.get(&pathogen.name)?.supports_route(&scenario.exposure_route) {
            warn!(
                scenario_id = %scenario.scenario_id,
                pathogen = %pathogen.name,
                route = %scenario.exposure_route,
                "exposure route not listed for pathogen"
            );
        }

        let concentration = self.concentrations.get(&scenario.pathogen_ref).ok_or_else(|| {
            Self::resolution_error(
                scenario,
                format!("no concentration data for pathogen '{}'", scenario.pathogen_ref),
            )
        })?;

        let seed = self.config.scenario_seed(&scenario.scenario_id);
        let mut sim = MonteCarloSimulator::new(seed).with_percentiles(&self.config.percentiles);
        let reported = sim.percentiles().to_vec();
        sim.add_distribution(concentration.descriptor(CONCENTRATION)?);
        sim.add_distribution(self.volume_descriptor(scenario)?);

        let dilution = self.dilution_descriptor(scenario)?;
        let diluted = dilution.is_some();
        if let Some(descriptor) = dilution {
            sim.add_distribution(descriptor);
        }

        let lrv = scenario.treatment_lrv;
        let sampled_lrv = scenario.treatment_lrv_uncertainty > 0.0;
        if sampled_lrv {
            sim.add_distribution(DistributionDescriptor::normal(
                TREATMENT_LRV,
                lrv,
                scenario.treatment_lrv_uncertainty,
            )?);
        }

        let model = pathogen.model;
        let risk = risk_fn(model.kind().as_str(), move |inputs: &SampledInputs| {
            let concentration = inputs.get(CONCENTRATION)?;
            let volume = inputs.get(VOLUME)?;
            let dilution = if diluted { Some(inputs.get(DILUTION)?) } else { None };
            let lrv_samples = if sampled_lrv { Some(inputs.get(TREATMENT_LRV)?) } else { None };

            let doses: Vec<f64> = (0..inputs.iterations())
                .map(|i| {
                    let reduction = lrv_samples.map_or(lrv, |v| v[i].max(0.0));
                    let treated = concentration[i] / 10f64.powf(reduction);
                    let exposure = treated / dilution.map_or(1.0, |d| d[i]);
                    exposure * volume[i] / 1000.0
                })
                .collect();
            Ok(model.infection_probabilities(&doses))
        });

        let iterations = scenario
            .iteration_count
            .unwrap_or(self.config.default_iterations);
        let infection = sim.run_simulation(&risk, iterations, INFECTION)?;
        let illness = infection.scaled(ILLNESS, pathogen.illness_to_infection_ratio);

        let frequency = scenario.frequency_per_year;
        let annual_risk_median = annual_risk(infection.median(), frequency);
        let annual_illness_median = annual_risk(illness.median(), frequency);
        let threshold = self.config.compliance_threshold;

        if annual_risk_median.is_nan() {
            warn!(
                scenario_id = %scenario.scenario_id,
                "annual risk is undefined, classified non-compliant"
            );
        }

        let population_impact = if annual_risk_median.is_finite() {
            (annual_risk_median * scenario.population as f64).round() as u64
        } else {
            0
        };
        let compliance = Compliance::classify(annual_risk_median, threshold);

        debug!(
            scenario_id = %scenario.scenario_id,
            pathogen = %pathogen.name,
            annual_risk_median,
            compliance = compliance.as_str(),
            "scenario evaluated"
        );

        Ok(ScenarioResult {
            scenario_id: scenario.scenario_id.clone(),
            scenario_name: scenario.display_name().to_string(),
            pathogen: pathogen.name,
            model: model.kind(),
            exposure_route: scenario.exposure_route.clone(),
            location: scenario.location_ref.clone(),
            priority: scenario.priority.clone(),
            iterations,
            seed,
            infection: OutcomeSummary::from_result(&infection, &reported),
            illness: OutcomeSummary::from_result(&illness, &reported),
            annual_risk_median,
            annual_risk_p5: annual_risk(infection.percentile(5.0), frequency),
            annual_risk_p95: annual_risk(infection.percentile(95.0), frequency),
            annual_illness_median,
            dalys_per_person_year: annual_illness_median * pathogen.dalys_per_case,
            population: scenario.population,
            population_impact,
            threshold,
            compliance,
        })
    }
}
