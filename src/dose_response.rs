use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::special::{
    brent, gamma_cdf, hyp2f1, ln_beta_ratio, std_normal_cdf, std_normal_quantile,
};
use crate::{QmraError, Result};

/// Upper end of the dose bracket searched by the numeric inverse.
pub const MAX_SEARCH_DOSE: f64 = 1.0e10;

const SOLVER_TOLERANCE: f64 = 1.0e-12;
const SOLVER_MAX_ITER: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Exponential,
    BetaPoisson,
    BetaPoissonExact,
    BetaBinomial,
    FractionalPoisson,
    Weibull,
    LogLogistic,
    LogProbit,
    SimpleBinomial,
    SimpleThreshold,
    OverdispersedThreshold,
}

impl ModelKind {
    pub const ALL: [ModelKind; 11] = [
        ModelKind::Exponential,
        ModelKind::BetaPoisson,
        ModelKind::BetaPoissonExact,
        ModelKind::BetaBinomial,
        ModelKind::FractionalPoisson,
        ModelKind::Weibull,
        ModelKind::LogLogistic,
        ModelKind::LogProbit,
        ModelKind::SimpleBinomial,
        ModelKind::SimpleThreshold,
        ModelKind::OverdispersedThreshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Exponential => "exponential",
            ModelKind::BetaPoisson => "beta_poisson",
            ModelKind::BetaPoissonExact => "beta_poisson_exact",
            ModelKind::BetaBinomial => "beta_binomial",
            ModelKind::FractionalPoisson => "fractional_poisson",
            ModelKind::Weibull => "weibull",
            ModelKind::LogLogistic => "log_logistic",
            ModelKind::LogProbit => "log_probit",
            ModelKind::SimpleBinomial => "simple_binomial",
            ModelKind::SimpleThreshold => "simple_threshold",
            ModelKind::OverdispersedThreshold => "overdispersed_threshold",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = QmraError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == key)
            .ok_or_else(|| QmraError::UnsupportedModel(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DoseResponseModel {
    /// `P = 1 - exp(-r d)`
    Exponential { r: f64 },
    /// Approximate beta-Poisson, `P = 1 - (1 + d / beta)^-alpha`.
    BetaPoisson { alpha: f64, beta: f64 },
    /// `P = 1 - 2F1(alpha, alpha + beta; alpha + beta; -d)`
    BetaPoissonExact { alpha: f64, beta: f64 },
    /// `P = 1 - B(alpha, beta + d) / B(alpha, beta)`
    BetaBinomial { alpha: f64, beta: f64 },
    /// `P = p (1 - exp(-d / mu))`
    FractionalPoisson { p: f64, mu: f64 },
    /// `P = 1 - exp(-q1 d^q2)`
    Weibull { q1: f64, q2: f64 },
    /// `P = 1 / (1 + exp(q1 - q2 ln d))`
    LogLogistic { q1: f64, q2: f64 },
    /// `P = Phi(ln(d / q1) / q2)`
    LogProbit { q1: f64, q2: f64 },
    /// `P = 1 - (1 - r)^d`
    SimpleBinomial { r: f64 },
    /// Poisson dose, at least `k_min` surviving organisms (each with
    /// probability `r`) are needed: gamma CDF of shape `k_min` at `r d`.
    SimpleThreshold { r: f64, k_min: u32 },
    /// Negative-binomial dose with shape `k`, at least `k_min` surviving
    /// organisms needed.
    OverdispersedThreshold { r: f64, k_min: u32, k: f64 },
}

impl DoseResponseModel {
    pub fn exponential(r: f64) -> Result<Self> {
        Self::checked(DoseResponseModel::Exponential { r })
    }

    pub fn beta_poisson(alpha: f64, beta: f64) -> Result<Self> {
        Self::checked(DoseResponseModel::BetaPoisson { alpha, beta })
    }

    /// Approximate beta-Poisson from the median infectious dose:
    /// `beta = N50 / (2^(1/alpha) - 1)`.
    pub fn beta_poisson_from_n50(alpha: f64, n50: f64) -> Result<Self> {
        if !(alpha > 0.0 && n50 > 0.0) {
            return Err(QmraError::invalid(
                "beta_poisson",
                "alpha and N50 must be > 0",
            ));
        }
        let beta = n50 / ((std::f64::consts::LN_2 / alpha).exp_m1());
        Self::beta_poisson(alpha, beta)
    }

    pub fn beta_poisson_exact(alpha: f64, beta: f64) -> Result<Self> {
        Self::checked(DoseResponseModel::BetaPoissonExact { alpha, beta })
    }

    pub fn beta_binomial(alpha: f64, beta: f64) -> Result<Self> {
        Self::checked(DoseResponseModel::BetaBinomial { alpha, beta })
    }

    pub fn fractional_poisson(p: f64, mu: f64) -> Result<Self> {
        Self::checked(DoseResponseModel::FractionalPoisson { p, mu })
    }

    fn checked(model: Self) -> Result<Self> {
        model.validate()?;
        Ok(model)
    }

    /// Builds a model from a loosely typed kind name and parameter map.
    pub fn from_parameters(kind: &str, params: &BTreeMap<String, f64>) -> Result<Self> {
        let kind: ModelKind = kind.parse()?;
        let get = |key: &str| -> Result<f64> {
            params.get(key).copied().ok_or_else(|| {
                QmraError::invalid(kind.as_str(), format!("missing parameter '{key}'"))
            })
        };
        let get_count = |key: &str| -> Result<u32> {
            let value = get(key)?;
            if value < 1.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
                return Err(QmraError::invalid(
                    kind.as_str(),
                    format!("'{key}' must be a positive integer"),
                ));
            }
            Ok(value as u32)
        };

        let model = match kind {
            ModelKind::Exponential => DoseResponseModel::Exponential { r: get("r")? },
            ModelKind::BetaPoisson => {
                let alpha = get("alpha")?;
                match (params.get("beta"), params.get("n50")) {
                    (Some(&beta), _) => DoseResponseModel::BetaPoisson { alpha, beta },
                    (None, Some(&n50)) => return Self::beta_poisson_from_n50(alpha, n50),
                    (None, None) => {
                        return Err(QmraError::invalid(
                            kind.as_str(),
                            "missing parameter 'beta' (or 'n50')",
                        ))
                    }
                }
            }
            ModelKind::BetaPoissonExact => DoseResponseModel::BetaPoissonExact {
                alpha: get("alpha")?,
                beta: get("beta")?,
            },
            ModelKind::BetaBinomial => DoseResponseModel::BetaBinomial {
                alpha: get("alpha")?,
                beta: get("beta")?,
            },
            ModelKind::FractionalPoisson => DoseResponseModel::FractionalPoisson {
                p: get("p")?,
                mu: get("mu")?,
            },
            ModelKind::Weibull => DoseResponseModel::Weibull {
                q1: get("q1")?,
                q2: get("q2")?,
            },
            ModelKind::LogLogistic => DoseResponseModel::LogLogistic {
                q1: get("q1")?,
                q2: get("q2")?,
            },
            ModelKind::LogProbit => DoseResponseModel::LogProbit {
                q1: get("q1")?,
                q2: get("q2")?,
            },
            ModelKind::SimpleBinomial => DoseResponseModel::SimpleBinomial { r: get("r")? },
            ModelKind::SimpleThreshold => DoseResponseModel::SimpleThreshold {
                r: get("r")?,
                k_min: get_count("k_min")?,
            },
            ModelKind::OverdispersedThreshold => DoseResponseModel::OverdispersedThreshold {
                r: get("r")?,
                k_min: get_count("k_min")?,
                k: get("k")?,
            },
        };

        Self::checked(model)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            DoseResponseModel::Exponential { .. } => ModelKind::Exponential,
            DoseResponseModel::BetaPoisson { .. } => ModelKind::BetaPoisson,
            DoseResponseModel::BetaPoissonExact { .. } => ModelKind::BetaPoissonExact,
            DoseResponseModel::BetaBinomial { .. } => ModelKind::BetaBinomial,
            DoseResponseModel::FractionalPoisson { .. } => ModelKind::FractionalPoisson,
            DoseResponseModel::Weibull { .. } => ModelKind::Weibull,
            DoseResponseModel::LogLogistic { .. } => ModelKind::LogLogistic,
            DoseResponseModel::LogProbit { .. } => ModelKind::LogProbit,
            DoseResponseModel::SimpleBinomial { .. } => ModelKind::SimpleBinomial,
            DoseResponseModel::SimpleThreshold { .. } => ModelKind::SimpleThreshold,
            DoseResponseModel::OverdispersedThreshold { .. } => ModelKind::OverdispersedThreshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v > 0.0 && v.is_finite();
        let unit_open = |v: f64| v > 0.0 && v < 1.0;
        let unit_half_open = |v: f64| v > 0.0 && v <= 1.0;

        let reason = match *self {
            DoseResponseModel::Exponential { r } | DoseResponseModel::SimpleBinomial { r } => {
                (!unit_open(r)).then_some("r must lie in (0, 1)")
            }
            DoseResponseModel::BetaPoisson { alpha, beta }
            | DoseResponseModel::BetaPoissonExact { alpha, beta }
            | DoseResponseModel::BetaBinomial { alpha, beta } => {
                (!(positive(alpha) && positive(beta))).then_some("alpha and beta must be > 0")
            }
            DoseResponseModel::FractionalPoisson { p, mu } => (!(unit_half_open(p) && positive(mu)))
                .then_some("p must lie in (0, 1] and mu must be > 0"),
            DoseResponseModel::Weibull { q1, q2 } | DoseResponseModel::LogProbit { q1, q2 } => {
                (!(positive(q1) && positive(q2))).then_some("q1 and q2 must be > 0")
            }
            DoseResponseModel::LogLogistic { q1, q2 } => (!(q1.is_finite() && positive(q2)))
                .then_some("q1 must be finite and q2 must be > 0"),
            DoseResponseModel::SimpleThreshold { r, k_min } => (!(unit_half_open(r) && k_min >= 1))
                .then_some("r must lie in (0, 1] and k_min must be >= 1"),
            DoseResponseModel::OverdispersedThreshold { r, k_min, k } => {
                (!(unit_half_open(r) && k_min >= 1 && positive(k)))
                    .then_some("r must lie in (0, 1], k_min must be >= 1 and k must be > 0")
            }
        };

        match reason {
            Some(reason) => Err(QmraError::invalid(self.kind().as_str(), reason)),
            None => Ok(()),
        }
    }

    /// Infection probability for a single dose. Negative doses are treated
    /// as zero.
    pub fn infection_probability(&self, dose: f64) -> f64 {
        if dose < 0.0 {
            warn!(model = %self.kind(), dose, "negative dose clamped to zero");
        }
        let (p, fell_back) = self.evaluate_dose(dose.max(0.0));
        if fell_back {
            warn!(dose, "hypergeometric evaluation failed, using approximate beta-Poisson");
        }
        p
    }

    /// Vectorized [`infection_probability`](Self::infection_probability);
    /// warnings are aggregated per call.
    pub fn infection_probabilities(&self, doses: &[f64]) -> Vec<f64> {
        let mut negative = 0usize;
        let mut fallbacks = 0usize;

        let out = doses
            .iter()
            .map(|&dose| {
                if dose < 0.0 {
                    negative += 1;
                }
                let (p, fell_back) = self.evaluate_dose(dose.max(0.0));
                fallbacks += usize::from(fell_back);
                p
            })
            .collect();

        if negative > 0 {
            warn!(model = %self.kind(), count = negative, "negative doses clamped to zero");
        }
        if fallbacks > 0 {
            warn!(
                count = fallbacks,
                "hypergeometric evaluation failed, using approximate beta-Poisson"
            );
        }
        out
    }

    /// Returns the probability and whether the exact beta-Poisson had to fall
    /// back to its approximation.
    fn evaluate_dose(&self, dose: f64) -> (f64, bool) {
        if dose.is_nan() {
            return (f64::NAN, false);
        }
        if dose == 0.0 && !matches!(self, DoseResponseModel::LogLogistic { .. }) {
            return (0.0, false);
        }

        let mut fell_back = false;
        let p = match *self {
            DoseResponseModel::Exponential { r } => -(-r * dose).exp_m1(),
            DoseResponseModel::BetaPoisson { alpha, beta } => beta_poisson_approx(alpha, beta, dose),
            DoseResponseModel::BetaPoissonExact { alpha, beta } => {
                let (p, approx) = exact_or_approx(
                    hyp2f1(alpha, alpha + beta, alpha + beta, -dose),
                    alpha,
                    beta,
                    dose,
                );
                fell_back = approx;
                p
            }
            DoseResponseModel::BetaBinomial { alpha, beta } => {
                -ln_beta_ratio(alpha, beta, dose).exp_m1()
            }
            DoseResponseModel::FractionalPoisson { p, mu } => p * -(-dose / mu).exp_m1(),
            DoseResponseModel::Weibull { q1, q2 } => -(-q1 * dose.powf(q2)).exp_m1(),
            DoseResponseModel::LogLogistic { q1, q2 } => {
                let dose = dose.max(f64::EPSILON);
                1.0 / (1.0 + (q1 - q2 * dose.ln()).exp())
            }
            DoseResponseModel::LogProbit { q1, q2 } => std_normal_cdf((dose / q1).ln() / q2),
            DoseResponseModel::SimpleBinomial { r } => -(dose * (-r).ln_1p()).exp_m1(),
            DoseResponseModel::SimpleThreshold { r, k_min } => gamma_cdf(k_min as f64, r * dose),
            DoseResponseModel::OverdispersedThreshold { r, k_min, k } => {
                overdispersed_threshold(r * dose, k_min, k)
            }
        };

        (p.clamp(0.0, 1.0), fell_back)
    }

    /// Dose that produces infection probability `p`.
    ///
    /// `p <= 0` maps to a zero dose. `None` means the target is unreachable
    /// (e.g. above the fractional-Poisson plateau) or the numeric solve did
    /// not converge inside `(EPSILON, MAX_SEARCH_DOSE)`.
    pub fn dose_for_target_risk(&self, p: f64) -> Option<f64> {
        if p.is_nan() || p >= 1.0 {
            return None;
        }
        if p <= 0.0 {
            return Some(0.0);
        }

        let neg_log_survival = -(-p).ln_1p();
        let dose = match *self {
            DoseResponseModel::Exponential { r } => neg_log_survival / r,
            DoseResponseModel::BetaPoisson { alpha, beta } => {
                beta * (neg_log_survival / alpha).exp_m1()
            }
            DoseResponseModel::FractionalPoisson { p: plateau, mu } => {
                if p >= plateau {
                    return None;
                }
                -mu * (-p / plateau).ln_1p()
            }
            DoseResponseModel::Weibull { q1, q2 } => (neg_log_survival / q1).powf(1.0 / q2),
            DoseResponseModel::LogLogistic { q1, q2 } => ((q1 - ((1.0 - p) / p).ln()) / q2).exp(),
            DoseResponseModel::LogProbit { q1, q2 } => q1 * (q2 * std_normal_quantile(p)).exp(),
            DoseResponseModel::SimpleBinomial { r } => neg_log_survival / -(-r).ln_1p(),
            DoseResponseModel::BetaPoissonExact { .. }
            | DoseResponseModel::BetaBinomial { .. }
            | DoseResponseModel::SimpleThreshold { .. }
            | DoseResponseModel::OverdispersedThreshold { .. } => return self.solve_dose(p),
        };

        (dose.is_finite() && dose >= 0.0).then_some(dose)
    }

    fn solve_dose(&self, p: f64) -> Option<f64> {
        let lo = f64::EPSILON.ln();
        let hi = MAX_SEARCH_DOSE.ln();
        brent(
            |log_dose| self.evaluate_dose(log_dose.exp()).0 - p,
            lo,
            hi,
            SOLVER_TOLERANCE,
            SOLVER_MAX_ITER,
        )
        .map(f64::exp)
    }
}

fn beta_poisson_approx(alpha: f64, beta: f64, dose: f64) -> f64 {
    -(-alpha * (dose / beta).ln_1p()).exp_m1()
}

/// `P(X >= k_min)` for a negative-binomial count with the given mean and
/// shape, summing the lower tail through the pmf ratio recurrence.
fn overdispersed_threshold(mean: f64, k_min: u32, shape: f64) -> f64 {
    if mean <= 0.0 {
        return 0.0;
    }
    let ratio = mean / (shape + mean);
    let mut pmf = (-shape * (mean / shape).ln_1p()).exp();
    let mut lower_tail = 0.0;
    for j in 0..k_min {
        lower_tail += pmf;
        let j = j as f64;
        pmf *= (j + shape) / (j + 1.0) * ratio;
    }
    1.0 - lower_tail
}

/// `1 - 2F1` when the series produced a finite value, otherwise the
/// approximate beta-Poisson with a fallback flag.
fn exact_or_approx(hypergeometric: Option<f64>, alpha: f64, beta: f64, dose: f64) -> (f64, bool) {
    match hypergeometric {
        Some(f) if f.is_finite() => (1.0 - f, false),
        _ => (beta_poisson_approx(alpha, beta, dose), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn exponential_matches_closed_form_and_inverse() {
        let model = DoseResponseModel::exponential(0.04).unwrap();
        let p = model.infection_probability(10.0);
        assert_relative_eq!(p, 1.0 - (-0.4_f64).exp(), max_relative = 1e-12);
        assert_relative_eq!(model.dose_for_target_risk(p).unwrap(), 10.0, max_relative = 1e-10);
    }

    #[test]
    fn exponential_saturates_at_large_dose() {
        let model = DoseResponseModel::exponential(0.04).unwrap();
        assert_relative_eq!(model.infection_probability(500.0), 1.0, epsilon = 1e-8);
    }

    #[test]
    fn negative_doses_are_clamped() {
        let model = DoseResponseModel::beta_poisson(0.2, 0.4).unwrap();
        assert_eq!(model.infection_probabilities(&[-5.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(model.infection_probability(-1.0), 0.0);
    }

    #[test]
    fn beta_poisson_from_n50_halves_at_median_dose() {
        let model = DoseResponseModel::beta_poisson_from_n50(0.253, 6.17).unwrap();
        assert_relative_eq!(model.infection_probability(6.17), 0.5, max_relative = 1e-10);
    }

    #[test]
    fn failed_hypergeometric_falls_back_to_approximation() {
        let approx = beta_poisson_approx(0.25, 0.4, 30.0);
        for failed in [None, Some(f64::NAN), Some(f64::INFINITY)] {
            assert_eq!(exact_or_approx(failed, 0.25, 0.4, 30.0), (approx, true));
        }
        assert_eq!(exact_or_approx(Some(0.75), 0.25, 0.4, 30.0), (0.25, false));
    }

    #[test]
    fn exact_beta_poisson_follows_hypergeometric_identity() {
        let model = DoseResponseModel::beta_poisson_exact(0.3, 2.0).unwrap();
        let dose = 25.0;
        assert_relative_eq!(
            model.infection_probability(dose),
            1.0 - (1.0 + dose).powf(-0.3),
            max_relative = 1e-10
        );
        let p = model.infection_probability(dose);
        assert_relative_eq!(model.dose_for_target_risk(p).unwrap(), dose, max_relative = 1e-6);
    }

    #[test]
    fn beta_binomial_is_stable_at_large_dose() {
        let model = DoseResponseModel::beta_binomial(0.04, 0.055).unwrap();
        let p = model.infection_probability(1.0e9);
        assert!(p.is_finite() && p > 0.5 && p <= 1.0);
        assert_eq!(model.infection_probability(0.0), 0.0);
    }

    #[test]
    fn fractional_poisson_plateau_has_no_inverse() {
        let model = DoseResponseModel::fractional_poisson(0.72, 1106.0).unwrap();
        assert!(model.infection_probability(1.0e12) <= 0.72);
        assert!(model.dose_for_target_risk(0.8).is_none());
        let dose = model.dose_for_target_risk(0.36).unwrap();
        assert_relative_eq!(model.infection_probability(dose), 0.36, max_relative = 1e-10);
    }

    #[test]
    fn log_models_hit_one_half_at_their_median() {
        let probit = DoseResponseModel::LogProbit { q1: 50.0, q2: 1.2 };
        assert_relative_eq!(probit.infection_probability(50.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(probit.dose_for_target_risk(0.5).unwrap(), 50.0, max_relative = 1e-8);

        let logistic = DoseResponseModel::LogLogistic { q1: 4.0, q2: 2.0 };
        assert_relative_eq!(logistic.infection_probability(2.0_f64.exp()), 0.5, epsilon = 1e-12);
        assert!(logistic.infection_probability(0.0) < 1e-12);
    }

    #[test]
    fn weibull_and_binomial_inverses_round_trip() {
        let weibull = DoseResponseModel::Weibull { q1: 0.01, q2: 0.8 };
        let binomial = DoseResponseModel::SimpleBinomial { r: 0.02 };
        for model in [weibull, binomial] {
            let p = model.infection_probability(75.0);
            assert_relative_eq!(model.dose_for_target_risk(p).unwrap(), 75.0, max_relative = 1e-9);
        }
    }

    #[test]
    fn threshold_models_reduce_to_single_hit() {
        let single_hit = DoseResponseModel::exponential(0.1).unwrap();
        let threshold = DoseResponseModel::SimpleThreshold { r: 0.1, k_min: 1 };
        assert_relative_eq!(
            threshold.infection_probability(12.0),
            single_hit.infection_probability(12.0),
            max_relative = 1e-9
        );

        // negative binomial tends to Poisson as the shape grows
        let overdispersed = DoseResponseModel::OverdispersedThreshold {
            r: 0.1,
            k_min: 3,
            k: 1.0e7,
        };
        let poisson = DoseResponseModel::SimpleThreshold { r: 0.1, k_min: 3 };
        assert_relative_eq!(
            overdispersed.infection_probability(40.0),
            poisson.infection_probability(40.0),
            max_relative = 1e-4
        );

        let p = poisson.infection_probability(40.0);
        assert_relative_eq!(poisson.dose_for_target_risk(p).unwrap(), 40.0, max_relative = 1e-6);
    }

    #[test]
    fn target_risk_edge_cases() {
        let model = DoseResponseModel::exponential(0.5).unwrap();
        assert_eq!(model.dose_for_target_risk(0.0), Some(0.0));
        assert!(model.dose_for_target_risk(1.0).is_none());
        assert!(model.dose_for_target_risk(f64::NAN).is_none());
    }

    #[test]
    fn construction_rejects_out_of_range_parameters() {
        assert!(DoseResponseModel::exponential(1.5).is_err());
        assert!(DoseResponseModel::beta_poisson(-0.1, 3.0).is_err());
        assert!(DoseResponseModel::fractional_poisson(0.0, 10.0).is_err());
    }

    #[test]
    fn parses_kinds_and_parameter_maps() {
        assert_eq!("Beta-Poisson".parse::<ModelKind>().unwrap(), ModelKind::BetaPoisson);
        assert!(matches!(
            "gompertz".parse::<ModelKind>(),
            Err(QmraError::UnsupportedModel(_))
        ));

        let params = BTreeMap::from([("alpha".to_string(), 0.145), ("n50".to_string(), 896.0)]);
        let model = DoseResponseModel::from_parameters("beta_poisson", &params).unwrap();
        assert_relative_eq!(model.infection_probability(896.0), 0.5, max_relative = 1e-10);

        let missing = BTreeMap::from([("k_min".to_string(), 2.0)]);
        assert!(DoseResponseModel::from_parameters("simple_threshold", &missing).is_err());
    }

    #[test]
    fn deserializes_tagged_model() {
        let model: DoseResponseModel =
            serde_json::from_str(r#"{"model":"beta_binomial","alpha":0.04,"beta":0.055}"#).unwrap();
        assert_eq!(model.kind(), ModelKind::BetaBinomial);
    }

    proptest! {
        #[test]
        fn approximate_beta_poisson_is_monotone(
            alpha in 0.01f64..5.0,
            beta in 0.1f64..1.0e4,
            d1 in 0.0f64..1.0e6,
            step in 0.0f64..1.0e6,
        ) {
            let model = DoseResponseModel::beta_poisson(alpha, beta).unwrap();
            prop_assert_eq!(model.infection_probability(0.0), 0.0);
            let lo = model.infection_probability(d1);
            let hi = model.infection_probability(d1 + step);
            prop_assert!(lo <= hi);
            prop_assert!((0.0..=1.0).contains(&hi));
        }

        #[test]
        fn beta_binomial_inverse_round_trips(
            alpha in 0.1f64..2.0,
            beta in 0.5f64..50.0,
            dose in 0.01f64..1.0e3,
        ) {
            let model = DoseResponseModel::beta_binomial(alpha, beta).unwrap();
            let p = model.infection_probability(dose);
            let back = model.dose_for_target_risk(p).unwrap();
            prop_assert!((back - dose).abs() / dose < 1e-6, "dose {} recovered as {}", dose, back);
        }
    }
}
