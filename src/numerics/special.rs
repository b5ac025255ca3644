//! Special functions used by the likelihoods and the interval critical values.
//!
//! Thin, panic-free wrappers over statrs. Invalid arguments return NaN
//! instead of panicking so a single bad row can never abort a run.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

const NEWTON_MAX_ITERS: usize = 20;
const NEWTON_TOL: f64 = 1e-13;

/// ln Γ(x) for x > 0.
#[inline]
pub fn ln_gamma(x: f64) -> f64 {
    if !(x > 0.0) || !x.is_finite() {
        return f64::NAN;
    }
    statrs::function::gamma::ln_gamma(x)
}

/// Regularized incomplete beta I_x(a, b).
#[inline]
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if !(a > 0.0) || !(b > 0.0) || !(0.0..=1.0).contains(&x) {
        return f64::NAN;
    }
    statrs::function::beta::beta_reg(a, b, x)
}

#[inline]
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    Normal::standard().cdf(x)
}

/// Inverse standard Normal CDF. NaN outside (0, 1).
#[inline]
pub fn normal_quantile(p: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) {
        return f64::NAN;
    }
    Normal::standard().inverse_cdf(p)
}

/// Student-t CDF with `df` degrees of freedom, location 0, scale 1.
///
/// F(t) = 1 - I_x(df/2, 1/2) / 2 for t > 0, with x = df / (df + t^2)
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if t.is_infinite() {
        return if t > 0.0 { 1.0 } else { 0.0 };
    }
    let x = df / (df + t * t);
    let tail = 0.5 * incomplete_beta(0.5 * df, 0.5, x);
    if t > 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// ln f(t) for the standard Student-t density.
pub fn student_t_ln_pdf(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    ln_gamma(0.5 * (df + 1.0))
        - ln_gamma(0.5 * df)
        - 0.5 * (df * std::f64::consts::PI).ln()
        - 0.5 * (df + 1.0) * (t * t / df).ln_1p()
}

/// Inverse Student-t CDF. NaN outside (0, 1) or for df <= 0.
///
/// Seeds from the statrs inverse and polishes with Newton steps on
/// the beta-function CDF.
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) || !(df > 0.0) {
        return f64::NAN;
    }
    if (p - 0.5).abs() < f64::EPSILON {
        return 0.0;
    }

    let seed = match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => dist.inverse_cdf(p),
        Err(_) => normal_quantile(p),
    };
    let mut t = if seed.is_finite() { seed } else { normal_quantile(p) };

    for _ in 0..NEWTON_MAX_ITERS {
        let density = student_t_ln_pdf(t, df).exp();
        if !(density > 0.0) || !density.is_finite() {
            break;
        }
        let step = (student_t_cdf(t, df) - p) / density;
        if !step.is_finite() {
            break;
        }
        t -= step;
        if step.abs() <= NEWTON_TOL * t.abs().max(1.0) {
            break;
        }
    }
    t
}

/// Critical value for a symmetric two-sided interval with the given coverage.
/// `df = None` selects the Normal distribution.
pub fn two_sided_critical(coverage: f64, df: Option<f64>) -> f64 {
    if !(coverage > 0.0 && coverage < 1.0) {
        return f64::NAN;
    }
    let p = 0.5 + 0.5 * coverage;
    match df {
        Some(nu) => student_t_quantile(p, nu),
        None => normal_quantile(p),
    }
}
