use serde::{Deserialize, Serialize};

/// Percentiles reported for every simulation unless a superset is configured.
pub const DEFAULT_PERCENTILES: [f64; 9] = [1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (`ddof = 1`).
    pub std: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    /// Biased Fisher-Pearson skewness.
    pub skewness: f64,
    /// Biased excess kurtosis.
    pub kurtosis: f64,
}

impl SummaryStatistics {
    /// Statistics of an ascending, finite sample. `None` when empty.
    pub fn from_sorted(sorted: &[f64]) -> Option<Self> {
        if sorted.is_empty() {
            return None;
        }

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;

        let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
        for &x in sorted {
            let d = x - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
        }
        let sum_sq = m2;
        m2 /= n;
        m3 /= n;
        m4 /= n;

        let variance = if sorted.len() > 1 {
            sum_sq / (n - 1.0)
        } else {
            f64::NAN
        };

        // shape moments are reported as 0 for a sample without spread
        let (skewness, kurtosis) = if m2 > 0.0 {
            (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
        } else {
            (0.0, 0.0)
        };

        Some(Self {
            count: sorted.len(),
            mean,
            median: percentile_sorted(sorted, 50.0),
            std: variance.sqrt(),
            variance,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            skewness,
            kurtosis,
        })
    }

    /// Multiply every location/scale statistic by a non-negative `factor`.
    /// Shape statistics are invariant under positive scaling.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            count: self.count,
            mean: self.mean * factor,
            median: self.median * factor,
            std: self.std * factor,
            variance: self.variance * factor * factor,
            min: self.min * factor,
            max: self.max * factor,
            skewness: self.skewness,
            kurtosis: self.kurtosis,
        }
    }
}

/// Linearly interpolated percentile of an ascending slice, `p` in `[0, 100]`.
/// Returns NaN for an empty slice.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;

    if upper >= sorted.len() {
        return sorted[sorted.len() - 1];
    }
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Merge `extra` into the default percentile set, sorted and deduplicated.
pub fn percentile_set(extra: &[f64]) -> Vec<f64> {
    let mut set: Vec<f64> = DEFAULT_PERCENTILES.iter().chain(extra).copied().collect();
    set.sort_by(f64::total_cmp);
    set.dedup();
    set
}
