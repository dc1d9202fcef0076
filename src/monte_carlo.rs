use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::distributions::DistributionDescriptor;
use crate::dose_response::DoseResponseModel;
use crate::statistics::{percentile_set, percentile_sorted, SummaryStatistics};
use crate::{BoxError, QmraError, Result};

/// Input name a [`DoseResponseModel`] reads when used directly as a risk model.
pub const DOSE_VARIABLE: &str = "dose";

const RUN_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Maps one vector per sampled input to one output per iteration.
pub trait RiskModel {
    fn name(&self) -> &str;

    fn evaluate(&self, inputs: &SampledInputs) -> std::result::Result<Vec<f64>, BoxError>;
}

/// A named closure used as a [`RiskModel`].
pub struct FnRiskModel<F> {
    name: String,
    f: F,
}

pub fn risk_fn<F>(name: impl Into<String>, f: F) -> FnRiskModel<F>
where
    F: Fn(&SampledInputs) -> std::result::Result<Vec<f64>, BoxError>,
{
    FnRiskModel {
        name: name.into(),
        f,
    }
}

impl<F> RiskModel for FnRiskModel<F>
where
    F: Fn(&SampledInputs) -> std::result::Result<Vec<f64>, BoxError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, inputs: &SampledInputs) -> std::result::Result<Vec<f64>, BoxError> {
        (self.f)(inputs)
    }
}

impl RiskModel for DoseResponseModel {
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    fn evaluate(&self, inputs: &SampledInputs) -> std::result::Result<Vec<f64>, BoxError> {
        Ok(self.infection_probabilities(inputs.get(DOSE_VARIABLE)?))
    }
}

/// Samples drawn for one simulation run, all of the same length.
#[derive(Clone, Debug, Default)]
pub struct SampledInputs {
    iterations: usize,
    columns: BTreeMap<String, Vec<f64>>,
}

impl SampledInputs {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            columns: BTreeMap::new(),
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.iterations {
            return Err(QmraError::invalid(
                name,
                format!("expected {} samples, got {}", self.iterations, values.len()),
            ));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| QmraError::invalid(name, "no distribution registered under this name"))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SimulationResult {
    pub variable_name: String,
    /// Finite outputs in iteration order.
    pub samples: Vec<f64>,
    /// `None` when no output was finite.
    pub statistics: Option<SummaryStatistics>,
    pub percentiles: BTreeMap<String, f64>,
    pub iteration_count: usize,
    pub seed: u64,
    /// Number of non-finite outputs filtered before reduction.
    pub discarded: usize,
}

pub fn percentile_key(p: f64) -> String {
    format!("p{p}")
}

impl SimulationResult {
    fn from_outputs(
        variable_name: &str,
        outputs: Vec<f64>,
        percentiles: &[f64],
        seed: u64,
    ) -> Self {
        let iteration_count = outputs.len();
        let samples: Vec<f64> = outputs.into_iter().filter(|v| v.is_finite()).collect();
        let discarded = iteration_count - samples.len();

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);
        let statistics = SummaryStatistics::from_sorted(&sorted);

        if statistics.is_none() {
            warn!(
                variable = variable_name,
                iterations = iteration_count,
                "simulation output has no finite values, statistics left empty"
            );
        } else if discarded > 0 {
            debug!(variable = variable_name, discarded, "filtered non-finite outputs");
        }

        let percentiles = percentiles
            .iter()
            .map(|&p| (percentile_key(p), percentile_sorted(&sorted, p)))
            .collect();

        Self {
            variable_name: variable_name.to_string(),
            samples,
            statistics,
            percentiles,
            iteration_count,
            seed,
            discarded,
        }
    }

    /// Value at percentile `p`, NaN for a degenerate run.
    pub fn percentile(&self, p: f64) -> f64 {
        if let Some(&value) = self.percentiles.get(&percentile_key(p)) {
            return value;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        percentile_sorted(&sorted, p)
    }

    pub fn mean(&self) -> f64 {
        self.statistics.as_ref().map_or(f64::NAN, |s| s.mean)
    }

    pub fn median(&self) -> f64 {
        self.statistics.as_ref().map_or(f64::NAN, |s| s.median)
    }

    pub fn is_degenerate(&self) -> bool {
        self.statistics.is_none()
    }

    pub fn require_statistics(&self) -> Result<&SummaryStatistics> {
        self.statistics
            .as_ref()
            .ok_or_else(|| QmraError::NumericDegeneracy {
                variable: self.variable_name.clone(),
            })
    }

    /// Result with every sample, statistic and percentile multiplied by a
    /// non-negative `factor`.
    pub fn scaled(&self, variable_name: impl Into<String>, factor: f64) -> Self {
        Self {
            variable_name: variable_name.into(),
            samples: self.samples.iter().map(|v| v * factor).collect(),
            statistics: self.statistics.as_ref().map(|s| s.scaled(factor)),
            percentiles: self
                .percentiles
                .iter()
                .map(|(k, v)| (k.clone(), v * factor))
                .collect(),
            iteration_count: self.iteration_count,
            seed: self.seed,
            discarded: self.discarded,
        }
    }
}

/// Short-lived simulator for one scenario.
///
/// Every variable draws from its own ChaCha stream, keyed by the seed, the
/// run number and the variable name, so adding a variable never shifts the
/// draws of another and two simulators with the same seed and configuration
/// produce the same sequence of results.
#[derive(Clone, Debug)]
pub struct MonteCarloSimulator {
    seed: u64,
    runs: u64,
    percentiles: Vec<f64>,
    distributions: BTreeMap<String, DistributionDescriptor>,
    cache: BTreeMap<String, Vec<f64>>,
}

impl MonteCarloSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            runs: 0,
            percentiles: percentile_set(&[]),
            distributions: BTreeMap::new(),
            cache: BTreeMap::new(),
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    /// Reports `extra` percentiles in addition to the default set.
    pub fn with_percentiles(mut self, extra: &[f64]) -> Self {
        self.percentiles = percentile_set(extra);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// Registers a distribution under its name, replacing any previous one
    /// and dropping its cached samples.
    pub fn add_distribution(&mut self, descriptor: DistributionDescriptor) {
        let name = descriptor.name().to_string();
        self.cache.remove(&name);
        self.distributions.insert(name, descriptor);
    }

    pub fn distribution(&self, name: &str) -> Option<&DistributionDescriptor> {
        self.distributions.get(name)
    }

    /// Samples drawn for `name` by the latest run.
    pub fn samples(&self, name: &str) -> Option<&[f64]> {
        self.cache.get(name).map(Vec::as_slice)
    }

    fn variable_rng(&self, run: u64, name: &str) -> ChaCha8Rng {
        let mut rng =
            ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(run.wrapping_mul(RUN_SEED_STRIDE)));
        rng.set_stream(fnv1a(name));
        rng
    }

    /// Draws `iterations` samples for every registered distribution.
    pub fn draw(&mut self, iterations: usize) -> Result<SampledInputs> {
        if iterations == 0 {
            return Err(QmraError::invalid("simulation", "iterations must be > 0"));
        }

        let run = self.runs;
        self.runs += 1;

        let mut inputs = SampledInputs::new(iterations);
        for (name, descriptor) in &self.distributions {
            let mut rng = self.variable_rng(run, name);
            let values = descriptor.sample(&mut rng, iterations)?;
            self.cache.insert(name.clone(), values.clone());
            inputs.insert(name.clone(), values)?;
        }
        Ok(inputs)
    }

    pub fn run_simulation<M>(
        &mut self,
        model: &M,
        iterations: usize,
        variable_name: &str,
    ) -> Result<SimulationResult>
    where
        M: RiskModel + ?Sized,
    {
        let inputs = self.draw(iterations)?;

        let outputs = model
            .evaluate(&inputs)
            .map_err(|source| QmraError::ModelEvaluationFailure {
                model: model.name().to_string(),
                source,
            })?;

        if outputs.len() != iterations {
            return Err(QmraError::ModelEvaluationFailure {
                model: model.name().to_string(),
                source: format!(
                    "returned {} values for {} iterations",
                    outputs.len(),
                    iterations
                )
                .into(),
            });
        }

        debug!(
            model = model.name(),
            variable = variable_name,
            iterations,
            "simulation run complete"
        );

        Ok(SimulationResult::from_outputs(
            variable_name,
            outputs,
            &self.percentiles,
            self.seed,
        ))
    }
}

pub(crate) fn fnv1a(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn uniform(name: &str) -> DistributionDescriptor {
        DistributionDescriptor::uniform(name, 0.0, 1.0).unwrap()
    }

    fn identity(name: &'static str) -> impl RiskModel {
        risk_fn("identity", move |inputs: &SampledInputs| {
            Ok(inputs.get(name)?.to_vec())
        })
    }

    #[test]
    fn same_seed_reproduces_results() {
        let mut a = MonteCarloSimulator::new(99);
        let mut b = MonteCarloSimulator::new(99);
        a.add_distribution(uniform("x"));
        b.add_distribution(uniform("x"));

        let ra = a.run_simulation(&identity("x"), 500, "x").unwrap();
        let rb = b.run_simulation(&identity("x"), 500, "x").unwrap();
        assert_eq!(ra.samples, rb.samples);
        assert_eq!(ra.statistics, rb.statistics);
        assert_eq!(ra.seed, 99);
    }

    #[test]
    fn later_variables_do_not_shift_earlier_draws() {
        let mut a = MonteCarloSimulator::new(5);
        a.add_distribution(uniform("x"));
        a.draw(100).unwrap();

        let mut b = MonteCarloSimulator::new(5);
        b.add_distribution(uniform("x"));
        b.add_distribution(DistributionDescriptor::normal("a_first", 0.0, 1.0).unwrap());
        b.draw(100).unwrap();

        assert_eq!(a.samples("x"), b.samples("x"));
    }

    #[test]
    fn variables_are_independent_streams() {
        let mut sim = MonteCarloSimulator::new(1);
        sim.add_distribution(uniform("x"));
        sim.add_distribution(uniform("y"));
        sim.draw(50).unwrap();
        assert_ne!(sim.samples("x"), sim.samples("y"));
    }

    #[test]
    fn re_registering_drops_cached_samples() {
        let mut sim = MonteCarloSimulator::new(1);
        sim.add_distribution(uniform("x"));
        sim.draw(10).unwrap();
        assert_eq!(sim.samples("x").map(<[f64]>::len), Some(10));

        sim.add_distribution(DistributionDescriptor::uniform("x", 5.0, 6.0).unwrap());
        assert!(sim.samples("x").is_none());
        let result = sim.run_simulation(&identity("x"), 10, "x").unwrap();
        assert!(result.samples.iter().all(|v| (5.0..6.0).contains(v)));
    }

    #[test]
    fn reports_statistics_and_percentiles() {
        let mut sim = MonteCarloSimulator::new(2024).with_percentiles(&[2.5, 97.5]);
        sim.add_distribution(uniform("x"));
        let result = sim.run_simulation(&identity("x"), 20_000, "x").unwrap();

        let stats = result.require_statistics().unwrap();
        assert_eq!(stats.count, 20_000);
        assert_abs_diff_eq!(stats.mean, 0.5, epsilon = 0.01);
        assert_abs_diff_eq!(stats.variance, 1.0 / 12.0, epsilon = 0.005);
        assert_abs_diff_eq!(result.percentile(97.5), 0.975, epsilon = 0.01);
        assert!(result.percentiles.contains_key("p2.5"));
        assert!(result.percentiles.contains_key("p99"));
    }

    #[test]
    fn model_errors_name_the_model() {
        let mut sim = MonteCarloSimulator::new(1);
        sim.add_distribution(uniform("x"));
        let failing = risk_fn("broken", |_: &SampledInputs| Err("boom".into()));

        match sim.run_simulation(&failing, 10, "risk") {
            Err(QmraError::ModelEvaluationFailure { model, source }) => {
                assert_eq!(model, "broken");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_input_and_wrong_length_fail() {
        let mut sim = MonteCarloSimulator::new(1);
        sim.add_distribution(uniform("x"));
        assert!(matches!(
            sim.run_simulation(&identity("volume"), 10, "risk"),
            Err(QmraError::ModelEvaluationFailure { .. })
        ));

        let short = risk_fn("short", |_: &SampledInputs| Ok(vec![0.0; 3]));
        assert!(matches!(
            sim.run_simulation(&short, 10, "risk"),
            Err(QmraError::ModelEvaluationFailure { .. })
        ));
        assert!(sim.run_simulation(&short, 0, "risk").is_err());
    }

    #[test]
    fn non_finite_outputs_are_filtered() {
        let mut sim = MonteCarloSimulator::new(1);
        sim.add_distribution(uniform("x"));
        let half_nan = risk_fn("half", |inputs: &SampledInputs| {
            let x = inputs.get("x")?;
            Ok(x.iter()
                .enumerate()
                .map(|(i, v)| if i % 2 == 0 { f64::NAN } else { *v })
                .collect())
        });
        let result = sim.run_simulation(&half_nan, 100, "risk").unwrap();
        assert_eq!(result.discarded, 50);
        assert_eq!(result.samples.len(), 50);
        assert_eq!(result.iteration_count, 100);
    }

    #[test]
    fn all_non_finite_output_is_degenerate_not_fatal() {
        let mut sim = MonteCarloSimulator::new(1);
        let nan = risk_fn("nan", |inputs: &SampledInputs| {
            Ok(vec![f64::INFINITY; inputs.iterations()])
        });
        let result = sim.run_simulation(&nan, 20, "risk").unwrap();
        assert!(result.is_degenerate());
        assert!(result.median().is_nan());
        assert!(result.percentile(95.0).is_nan());
        assert!(matches!(
            result.require_statistics(),
            Err(QmraError::NumericDegeneracy { .. })
        ));
    }

    #[test]
    fn dose_response_model_reads_dose_input() {
        let mut sim = MonteCarloSimulator::new(3);
        sim.add_distribution(DistributionDescriptor::uniform(DOSE_VARIABLE, 10.0, 20.0).unwrap());
        let model = DoseResponseModel::Exponential { r: 0.01 };
        let result = sim.run_simulation(&model, 1000, "p_inf").unwrap();
        let lo = 1.0 - (-0.1_f64).exp();
        let hi = 1.0 - (-0.2_f64).exp();
        assert!(result.samples.iter().all(|p| (lo..=hi).contains(p)));
    }

    #[test]
    fn scaling_applies_to_every_summary() {
        let mut sim = MonteCarloSimulator::new(8);
        sim.add_distribution(uniform("x"));
        let result = sim.run_simulation(&identity("x"), 200, "x").unwrap();
        let half = result.scaled("half", 0.5);
        assert_eq!(half.variable_name, "half");
        assert_abs_diff_eq!(half.median(), result.median() * 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(half.percentile(95.0), result.percentile(95.0) * 0.5, epsilon = 1e-15);
    }
}
