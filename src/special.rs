use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::gamma::{gamma_lr, ln_gamma};

const HYP2F1_MAX_TERMS: usize = 20_000;
const HYP2F1_TOLERANCE: f64 = 1.0e-15;

/// Gauss hypergeometric function `2F1(a, b; c; z)` for real `z < 1`.
///
/// Negative arguments are mapped into `(0, 1)` with the Pfaff transformation
/// `2F1(a, b; c; z) = (1 - z)^-a 2F1(a, c - b; c; z / (z - 1))` before the
/// power series is summed. Returns `None` when `c` is a non-positive integer,
/// `z >= 1`, or the series does not settle within the term budget.
pub fn hyp2f1(a: f64, b: f64, c: f64, z: f64) -> Option<f64> {
    if !(a.is_finite() && b.is_finite() && c.is_finite() && z.is_finite()) {
        return None;
    }
    if c <= 0.0 && c.fract() == 0.0 {
        return None;
    }
    if z >= 1.0 {
        return None;
    }
    if z == 0.0 {
        return Some(1.0);
    }

    if z < 0.0 {
        let w = z / (z - 1.0);
        let prefactor = (-a * (-z).ln_1p()).exp();
        let series = hyp2f1_series(a, c - b, c, w)?;
        let value = prefactor * series;
        return value.is_finite().then_some(value);
    }

    hyp2f1_series(a, b, c, z)
}

fn hyp2f1_series(a: f64, b: f64, c: f64, z: f64) -> Option<f64> {
    let mut term = 1.0_f64;
    let mut sum = 1.0_f64;

    for k in 0..HYP2F1_MAX_TERMS {
        let k = k as f64;
        term *= (a + k) * (b + k) / ((c + k) * (k + 1.0)) * z;
        sum += term;
        if !sum.is_finite() {
            return None;
        }
        // terminating series (a or b a non-positive integer)
        if term == 0.0 {
            return Some(sum);
        }
        if term.abs() <= HYP2F1_TOLERANCE * sum.abs() {
            return Some(sum);
        }
    }

    None
}

/// `ln(B(a, b + n) / B(a, b))` written as a sum of log-gamma terms so large
/// `n` never overflows the raw beta functions.
pub fn ln_beta_ratio(a: f64, b: f64, n: f64) -> f64 {
    ln_gamma(b + n) + ln_gamma(a + b) - ln_gamma(a + b + n) - ln_gamma(b)
}

/// Regularized lower incomplete gamma `P(a, x)`, i.e. the CDF at `x` of a
/// unit-scale gamma distribution with shape `a`.
pub fn gamma_cdf(shape: f64, x: f64) -> f64 {
    if x.is_nan() || shape.is_nan() {
        return f64::NAN;
    }
    if x <= 0.0 {
        return 0.0;
    }
    if x.is_infinite() {
        return 1.0;
    }
    gamma_lr(shape, x)
}

/// Standard normal CDF.
pub fn std_normal_cdf(x: f64) -> f64 {
    standard_normal().map_or(f64::NAN, |n| n.cdf(x))
}

/// Standard normal quantile.
pub fn std_normal_quantile(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    standard_normal().map_or(f64::NAN, |n| n.inverse_cdf(p))
}

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

/// Brent's bracketed root finder.
///
/// `f(lo)` and `f(hi)` must have opposite signs, otherwise `None` is returned.
/// `None` is also returned when `max_iter` is exhausted before the bracket
/// shrinks below `tol`.
pub fn brent<F>(mut f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> Option<f64>
where
    F: FnMut(f64) -> f64,
{
    let (mut a, mut b) = (lo, hi);
    let (mut fa, mut fb) = (f(a), f(b));
    if !(fa.is_finite() && fb.is_finite()) {
        return None;
    }
    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }
    if fa.signum() == fb.signum() {
        return None;
    }

    let mut c = b;
    let mut fc = fb;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..max_iter {
        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Some(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * qa * (qa - r) - (b - a) * (r - 1.0)),
                    (qa - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol1 { d } else { tol1.copysign(xm) };
        fb = f(b);
        if !fb.is_finite() {
            return None;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hyp2f1_matches_closed_form_when_b_equals_c() {
        // 2F1(a, b; b; z) = (1 - z)^-a
        let value = hyp2f1(0.3, 2.5, 2.5, -40.0).unwrap();
        assert_relative_eq!(value, 41.0_f64.powf(-0.3), max_relative = 1e-12);
    }

    #[test]
    fn hyp2f1_matches_log_identity() {
        // ln(1 + z) = z 2F1(1, 1; 2; -z)
        let z = 0.5;
        let value = hyp2f1(1.0, 1.0, 2.0, -z).unwrap();
        assert_relative_eq!(z * value, z.ln_1p(), max_relative = 1e-12);
    }

    #[test]
    fn hyp2f1_rejects_pole_and_divergent_argument() {
        assert!(hyp2f1(1.0, 1.0, -2.0, 0.5).is_none());
        assert!(hyp2f1(1.0, 1.0, 2.0, 1.5).is_none());
    }

    #[test]
    fn ln_beta_ratio_is_zero_for_zero_increment() {
        assert_relative_eq!(ln_beta_ratio(0.4, 3.0, 0.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn gamma_cdf_with_unit_shape_is_exponential() {
        assert_relative_eq!(gamma_cdf(1.0, 2.0), 1.0 - (-2.0_f64).exp(), max_relative = 1e-10);
        assert_eq!(gamma_cdf(3.0, 0.0), 0.0);
    }

    #[test]
    fn normal_helpers_are_inverse() {
        assert_relative_eq!(std_normal_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(std_normal_quantile(std_normal_cdf(1.3)), 1.3, epsilon = 1e-8);
    }

    #[test]
    fn brent_finds_cubic_root() {
        let root = brent(|x| x * x * x - 2.0 * x - 5.0, 2.0, 3.0, 1e-14, 100).unwrap();
        assert_relative_eq!(root, 2.094_551_481_542_326_5, epsilon = 1e-10);
    }

    #[test]
    fn brent_requires_sign_change() {
        assert!(brent(|x| x * x + 1.0, -1.0, 1.0, 1e-12, 100).is_none());
    }
}
