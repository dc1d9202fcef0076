use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{
    Beta, Binomial, Distribution, Exp, Gamma, LogNormal, Normal, Poisson, Triangular, Uniform,
    Weibull,
};
use serde::{Deserialize, Serialize};

use crate::{QmraError, Result};

/// Default breakpoint percentile of the hockey-stick distribution.
pub const DEFAULT_HOCKEY_STICK_PERCENTILE: f64 = 95.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionKind {
    Normal {
        mean: f64,
        std: f64,
    },
    /// Parameters are the mean and standard deviation of `ln X`.
    Lognormal {
        mu: f64,
        sigma: f64,
    },
    Uniform {
        min: f64,
        max: f64,
    },
    Triangular {
        min: f64,
        mode: f64,
        max: f64,
    },
    Beta {
        alpha: f64,
        beta: f64,
    },
    Gamma {
        shape: f64,
        scale: f64,
    },
    Exponential {
        rate: f64,
    },
    Weibull {
        shape: f64,
        scale: f64,
    },
    Poisson {
        lambda: f64,
    },
    Binomial {
        n: u64,
        p: f64,
    },
    EmpiricalCdf(EmpiricalCdf),
    HockeyStick(HockeyStick),
}

impl DistributionKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DistributionKind::Normal { .. } => "normal",
            DistributionKind::Lognormal { .. } => "lognormal",
            DistributionKind::Uniform { .. } => "uniform",
            DistributionKind::Triangular { .. } => "triangular",
            DistributionKind::Beta { .. } => "beta",
            DistributionKind::Gamma { .. } => "gamma",
            DistributionKind::Exponential { .. } => "exponential",
            DistributionKind::Weibull { .. } => "weibull",
            DistributionKind::Poisson { .. } => "poisson",
            DistributionKind::Binomial { .. } => "binomial",
            DistributionKind::EmpiricalCdf(_) => "empirical_cdf",
            DistributionKind::HockeyStick(_) => "hockey_stick",
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let context = format!("{} distribution '{name}'", self.kind_name());
        let fail = |reason: &str| Err(QmraError::invalid(context.clone(), reason));

        match *self {
            DistributionKind::Normal { mean, std } => {
                if !mean.is_finite() || !std.is_finite() || std < 0.0 {
                    return fail("mean must be finite and std must be finite and >= 0");
                }
            }
            DistributionKind::Lognormal { mu, sigma } => {
                if !mu.is_finite() || !sigma.is_finite() || sigma < 0.0 {
                    return fail("mu must be finite and sigma must be finite and >= 0");
                }
            }
            DistributionKind::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() || min >= max {
                    return fail("requires finite min < max");
                }
            }
            DistributionKind::Triangular { min, mode, max } => {
                if !(min.is_finite() && mode.is_finite() && max.is_finite())
                    || !(min < mode && mode < max)
                {
                    return fail("requires finite min < mode < max");
                }
            }
            DistributionKind::Beta { alpha, beta } => {
                if !(alpha > 0.0 && beta > 0.0 && alpha.is_finite() && beta.is_finite()) {
                    return fail("alpha and beta must be finite and > 0");
                }
            }
            DistributionKind::Gamma { shape, scale } | DistributionKind::Weibull { shape, scale } => {
                if !(shape > 0.0 && scale > 0.0 && shape.is_finite() && scale.is_finite()) {
                    return fail("shape and scale must be finite and > 0");
                }
            }
            DistributionKind::Exponential { rate } => {
                if !(rate > 0.0 && rate.is_finite()) {
                    return fail("rate must be finite and > 0");
                }
            }
            DistributionKind::Poisson { lambda } => {
                if !(lambda > 0.0 && lambda.is_finite()) {
                    return fail("lambda must be finite and > 0");
                }
            }
            DistributionKind::Binomial { p, .. } => {
                if !(0.0..=1.0).contains(&p) {
                    return fail("p must lie in [0, 1]");
                }
            }
            // both carry their invariants from their own constructors
            DistributionKind::EmpiricalCdf(_) | DistributionKind::HockeyStick(_) => {}
        }

        Ok(())
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Result<Vec<f64>> {
        let bad = |err: &dyn std::fmt::Display| QmraError::invalid(self.kind_name(), err.to_string());

        let samples = match self {
            DistributionKind::Normal { mean, std } => {
                let dist = Normal::new(*mean, *std).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Lognormal { mu, sigma } => {
                let dist = LogNormal::new(*mu, *sigma).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Uniform { min, max } => collect(&Uniform::new(*min, *max), rng, n),
            DistributionKind::Triangular { min, mode, max } => {
                let dist = Triangular::new(*min, *max, *mode).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Beta { alpha, beta } => {
                let dist = Beta::new(*alpha, *beta).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Gamma { shape, scale } => {
                let dist = Gamma::new(*shape, *scale).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Exponential { rate } => {
                let dist = Exp::new(*rate).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Weibull { shape, scale } => {
                let dist = Weibull::new(*scale, *shape).map_err(|e| bad(&e))?;
                collect(&dist, rng, n)
            }
            DistributionKind::Poisson { lambda } => {
                let dist = Poisson::new(*lambda).map_err(|e| bad(&e))?;
                (0..n)
                    .map(|_| Distribution::<f64>::sample(&dist, rng))
                    .collect()
            }
            DistributionKind::Binomial { n: trials, p } => {
                let dist = Binomial::new(*trials, *p).map_err(|e| bad(&e))?;
                (0..n).map(|_| dist.sample(rng) as f64).collect()
            }
            DistributionKind::EmpiricalCdf(ecdf) => {
                (0..n).map(|_| ecdf.quantile(rng.gen::<f64>())).collect()
            }
            DistributionKind::HockeyStick(hs) => {
                (0..n).map(|_| hs.quantile(rng.gen::<f64>())).collect()
            }
        };

        Ok(samples)
    }
}

fn collect<D, R>(dist: &D, rng: &mut R, n: usize) -> Vec<f64>
where
    D: Distribution<f64>,
    R: Rng + ?Sized,
{
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// A named, validated distribution. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorSpec", into = "DescriptorSpec")]
pub struct DistributionDescriptor {
    name: String,
    kind: DistributionKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DescriptorSpec {
    name: String,
    #[serde(flatten)]
    kind: DistributionKind,
}

impl TryFrom<DescriptorSpec> for DistributionDescriptor {
    type Error = QmraError;

    fn try_from(spec: DescriptorSpec) -> Result<Self> {
        DistributionDescriptor::new(spec.name, spec.kind)
    }
}

impl From<DistributionDescriptor> for DescriptorSpec {
    fn from(descriptor: DistributionDescriptor) -> Self {
        DescriptorSpec {
            name: descriptor.name,
            kind: descriptor.kind,
        }
    }
}

impl DistributionDescriptor {
    pub fn new(name: impl Into<String>, kind: DistributionKind) -> Result<Self> {
        let name = name.into();
        kind.validate(&name)?;
        Ok(Self { name, kind })
    }

    pub fn normal(name: impl Into<String>, mean: f64, std: f64) -> Result<Self> {
        Self::new(name, DistributionKind::Normal { mean, std })
    }

    pub fn lognormal(name: impl Into<String>, mu: f64, sigma: f64) -> Result<Self> {
        Self::new(name, DistributionKind::Lognormal { mu, sigma })
    }

    /// Lognormal centred on `median` with arithmetic coefficient of variation
    /// `cv`, i.e. `sigma = sqrt(ln(1 + cv^2))`.
    pub fn lognormal_from_median_cv(name: impl Into<String>, median: f64, cv: f64) -> Result<Self> {
        let name = name.into();
        if !(median > 0.0 && median.is_finite()) || !(cv >= 0.0 && cv.is_finite()) {
            return Err(QmraError::invalid(
                format!("lognormal distribution '{name}'"),
                "median must be > 0 and cv must be >= 0",
            ));
        }
        Self::lognormal(name, median.ln(), (1.0 + cv * cv).ln().sqrt())
    }

    pub fn uniform(name: impl Into<String>, min: f64, max: f64) -> Result<Self> {
        Self::new(name, DistributionKind::Uniform { min, max })
    }

    pub fn triangular(name: impl Into<String>, min: f64, mode: f64, max: f64) -> Result<Self> {
        Self::new(name, DistributionKind::Triangular { min, mode, max })
    }

    pub fn empirical(name: impl Into<String>, ecdf: EmpiricalCdf) -> Result<Self> {
        Self::new(name, DistributionKind::EmpiricalCdf(ecdf))
    }

    pub fn hockey_stick(
        name: impl Into<String>,
        x_min: f64,
        x_median: f64,
        x_max: f64,
        percentile: f64,
    ) -> Result<Self> {
        let hs = HockeyStick::new(x_min, x_median, x_max, percentile)?;
        Self::new(name, DistributionKind::HockeyStick(hs))
    }

    /// Builds a descriptor from a loosely typed `kind` plus key/value
    /// parameter map, as found in reference tables.
    pub fn from_parameters(
        name: impl Into<String>,
        kind: &str,
        params: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let name = name.into();
        let kind_key = kind.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let context = format!("{kind_key} distribution '{name}'");
        let get = |keys: &[&str]| -> Result<f64> {
            keys.iter()
                .find_map(|key| params.get(*key).copied())
                .ok_or_else(|| {
                    QmraError::invalid(context.clone(), format!("missing parameter '{}'", keys[0]))
                })
        };

        let kind = match kind_key.as_str() {
            "normal" => DistributionKind::Normal {
                mean: get(&["mean", "mu"])?,
                std: get(&["std", "sigma"])?,
            },
            "lognormal" => DistributionKind::Lognormal {
                mu: get(&["mu", "mean"])?,
                sigma: get(&["sigma", "std"])?,
            },
            "uniform" => DistributionKind::Uniform {
                min: get(&["min", "low"])?,
                max: get(&["max", "high"])?,
            },
            "triangular" => DistributionKind::Triangular {
                min: get(&["min", "left"])?,
                mode: get(&["mode"])?,
                max: get(&["max", "right"])?,
            },
            "beta" => DistributionKind::Beta {
                alpha: get(&["alpha", "a"])?,
                beta: get(&["beta", "b"])?,
            },
            "gamma" => DistributionKind::Gamma {
                shape: get(&["shape", "k"])?,
                scale: get(&["scale", "theta"])?,
            },
            "exponential" => DistributionKind::Exponential {
                rate: match get(&["rate", "lambda"]) {
                    Ok(rate) => rate,
                    Err(_) => 1.0 / get(&["scale"])?,
                },
            },
            "weibull" => DistributionKind::Weibull {
                shape: get(&["shape", "k"])?,
                scale: get(&["scale", "lambda"])?,
            },
            "poisson" => DistributionKind::Poisson {
                lambda: get(&["lambda", "mu"])?,
            },
            "binomial" => {
                let trials = get(&["n"])?;
                if trials < 0.0 || trials.fract() != 0.0 {
                    return Err(QmraError::invalid(context.clone(), "n must be a non-negative integer"));
                }
                DistributionKind::Binomial {
                    n: trials as u64,
                    p: get(&["p"])?,
                }
            }
            "hockey_stick" => DistributionKind::HockeyStick(HockeyStick::new(
                get(&["x_min", "min"])?,
                get(&["x_median", "median"])?,
                get(&["x_max", "max"])?,
                params
                    .get("percentile")
                    .copied()
                    .unwrap_or(DEFAULT_HOCKEY_STICK_PERCENTILE),
            )?),
            "empirical_cdf" | "empirical" => {
                return Err(QmraError::invalid(
                    context.clone(),
                    "empirical distributions are built from observations, not scalar parameters",
                ));
            }
            other => return Err(QmraError::UnsupportedDistribution(other.to_string())),
        };

        Self::new(name, kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DistributionKind {
        &self.kind
    }

    /// Draw `n` independent samples.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Result<Vec<f64>> {
        self.kind.draw(rng, n)
    }
}

/// Step-function ECDF over raw observations with Weibull plotting positions
/// `p_i = i / n`, sampled by linear interpolation of its inverse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EmpiricalSpec", into = "EmpiricalSpec")]
pub struct EmpiricalCdf {
    values: Vec<f64>,
    probabilities: Vec<f64>,
    lower: Option<f64>,
    upper: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EmpiricalSpec {
    observations: Vec<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl TryFrom<EmpiricalSpec> for EmpiricalCdf {
    type Error = QmraError;

    fn try_from(spec: EmpiricalSpec) -> Result<Self> {
        EmpiricalCdf::from_observations(&spec.observations)?.with_bounds(spec.min, spec.max)
    }
}

impl From<EmpiricalCdf> for EmpiricalSpec {
    fn from(ecdf: EmpiricalCdf) -> Self {
        EmpiricalSpec {
            observations: ecdf.values,
            min: ecdf.lower,
            max: ecdf.upper,
        }
    }
}

impl EmpiricalCdf {
    pub fn from_observations(observations: &[f64]) -> Result<Self> {
        if observations.is_empty() {
            return Err(QmraError::invalid(
                "empirical_cdf",
                "at least one observation is required",
            ));
        }
        if observations.iter().any(|v| !v.is_finite()) {
            return Err(QmraError::invalid(
                "empirical_cdf",
                "observations must be finite",
            ));
        }

        let mut values = observations.to_vec();
        values.sort_by(f64::total_cmp);
        let n = values.len() as f64;
        let probabilities = (1..=values.len()).map(|i| i as f64 / n).collect();

        Ok(Self {
            values,
            probabilities,
            lower: None,
            upper: None,
        })
    }

    /// Clip sampled values to `[lower, upper]`.
    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Result<Self> {
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return Err(QmraError::invalid(
                    "empirical_cdf",
                    format!("lower bound {lo} exceeds upper bound {hi}"),
                ));
            }
        }
        if lower.is_some_and(|v| !v.is_finite()) || upper.is_some_and(|v| !v.is_finite()) {
            return Err(QmraError::invalid("empirical_cdf", "bounds must be finite"));
        }
        self.lower = lower;
        self.upper = upper;
        Ok(self)
    }

    /// Sorted observations.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn median(&self) -> f64 {
        self.quantile(0.5)
    }

    /// Inverse ECDF at `u`, linearly interpolated between the bracketing
    /// `(value, probability)` pairs and clipped to the declared bounds.
    /// Below the first plotting position the smallest observation is returned.
    /// NaN maps to NaN.
    pub fn quantile(&self, u: f64) -> f64 {
        if u.is_nan() {
            return f64::NAN;
        }
        let last = self.values.len() - 1;
        let raw = if u <= self.probabilities[0] {
            self.values[0]
        } else if u >= self.probabilities[last] {
            self.values[last]
        } else {
            let hi = self.probabilities.partition_point(|&p| p < u);
            let lo = hi - 1;
            let (p0, p1) = (self.probabilities[lo], self.probabilities[hi]);
            let (v0, v1) = (self.values[lo], self.values[hi]);
            v0 + (v1 - v0) * (u - p0) / (p1 - p0)
        };

        let raw = self.lower.map_or(raw, |lo| raw.max(lo));
        self.upper.map_or(raw, |hi| raw.min(hi))
    }
}

/// Three-segment piecewise-linear quantile function for right-skewed
/// concentration data.
///
/// The underlying density rises linearly from zero at `x_min` to `h1` at the
/// median, falls linearly to `h2` at the breakpoint `x_p` (the `percentile`-th
/// percentile) and then to zero at `x_max`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HockeyStickSpec", into = "HockeyStickSpec")]
pub struct HockeyStick {
    x_min: f64,
    x_median: f64,
    x_max: f64,
    percentile: f64,
    x_p: f64,
    h1: f64,
    h2: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct HockeyStickSpec {
    x_min: f64,
    x_median: f64,
    x_max: f64,
    #[serde(default = "default_hockey_stick_percentile")]
    percentile: f64,
}

fn default_hockey_stick_percentile() -> f64 {
    DEFAULT_HOCKEY_STICK_PERCENTILE
}

impl TryFrom<HockeyStickSpec> for HockeyStick {
    type Error = QmraError;

    fn try_from(spec: HockeyStickSpec) -> Result<Self> {
        HockeyStick::new(spec.x_min, spec.x_median, spec.x_max, spec.percentile)
    }
}

impl From<HockeyStick> for HockeyStickSpec {
    fn from(hs: HockeyStick) -> Self {
        HockeyStickSpec {
            x_min: hs.x_min,
            x_median: hs.x_median,
            x_max: hs.x_max,
            percentile: hs.percentile,
        }
    }
}

impl HockeyStick {
    pub fn new(x_min: f64, x_median: f64, x_max: f64, percentile: f64) -> Result<Self> {
        if !(x_min.is_finite() && x_median.is_finite() && x_max.is_finite()) {
            return Err(QmraError::invalid("hockey_stick", "bounds must be finite"));
        }
        if !(x_min < x_median && x_median < x_max) {
            return Err(QmraError::invalid(
                "hockey_stick",
                format!("requires x_min < x_median < x_max, got {x_min}, {x_median}, {x_max}"),
            ));
        }
        // the middle segment spans (0.5, P/100]
        if !(percentile > 50.0 && percentile < 100.0) {
            return Err(QmraError::invalid(
                "hockey_stick",
                format!(
                    "percentile must lie in (50, 100) so the breakpoint sits above the median, got {percentile}"
                ),
            ));
        }

        let p = percentile / 100.0;
        let d = x_max - x_median;
        let h1 = 1.0 / (x_median - x_min);

        // u = x_max - x_P is the positive root of h1 u^2 - (h1 D - 1) u - 2 (1 - p) D = 0
        let b = h1 * d - 1.0;
        let disc = b * b + 8.0 * h1 * (1.0 - p) * d;
        let u = (b + disc.sqrt()) / (2.0 * h1);
        let x_p = x_max - u;
        let h2 = 2.0 * (1.0 - p) / u;

        Ok(Self {
            x_min,
            x_median,
            x_max,
            percentile,
            x_p,
            h1,
            h2,
        })
    }

    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    pub fn x_median(&self) -> f64 {
        self.x_median
    }

    pub fn x_max(&self) -> f64 {
        self.x_max
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    /// Value at the breakpoint percentile.
    pub fn breakpoint(&self) -> f64 {
        self.x_p
    }

    pub fn h1(&self) -> f64 {
        self.h1
    }

    pub fn h2(&self) -> f64 {
        self.h2
    }

    /// Breakpoint obtained when `h2` is approximated with the full upper
    /// span `x_max - x_median` instead of `x_max - x_P`.
    pub fn simplified_breakpoint(&self) -> f64 {
        let p = self.percentile / 100.0;
        let h2 = 2.0 * (1.0 - p) / (self.x_max - self.x_median);
        self.x_median + (2.0 * p - 1.0) / (self.h1 + h2)
    }

    pub fn quantile(&self, u: f64) -> f64 {
        let p = self.percentile / 100.0;
        if u <= 0.5 {
            self.x_min + (self.x_median - self.x_min) * (u / 0.5)
        } else if u <= p {
            self.x_median + (self.x_p - self.x_median) * (u - 0.5) / (p - 0.5)
        } else {
            self.x_p + (self.x_max - self.x_p) * (u - p) / (1.0 - p)
        }
    }
}
