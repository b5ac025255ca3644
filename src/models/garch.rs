//! GARCH(1,1) maximum-likelihood fitter.
//!
//!   sigma^2_t = omega + alpha * eps^2_{t-1} + beta * sigma^2_{t-1}
//!
//! Search runs over unconstrained reals:
//!   p     = (1 - EPS) * logistic(theta_0)     persistence, alpha + beta
//!   s     = logistic(theta_1)                 alpha's share of p
//!   alpha = p * s,  beta = p * (1 - s)
//!   omega = exp(theta_2), or (1 - p) * sample_var under variance targeting
//!
//! so every candidate is stationary by construction; anything else the
//! objective sees is scored +infinity.

use crate::models::{ForecastContext, GarchSummary, VolForecast, VolatilityModel};
use crate::numerics::special::{ln_gamma, two_sided_critical};
use crate::rows::{RowReason, VolSource};
use crate::variables::{VolModel, Variables};
use argmin::core::{CostFunction, Error as ArgminError, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use statrs::function::logistic::logistic;

/// Fewer valid residuals than this and there is no fit.
pub const MIN_RESIDUALS: usize = 5;

/// Accepted fits satisfy alpha + beta < 1 - STATIONARITY_EPS.
pub const STATIONARITY_EPS: f64 = 1e-6;

/// Floor for any conditional or sample variance (sigma floor 1e-9).
const MIN_VARIANCE: f64 = 1e-18;

const START_ALPHA: f64 = 0.05;
const START_BETA: f64 = 0.90;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Nelder-Mead settings: iteration cap, stop once the simplex costs agree to
/// this standard deviation, and the offset that builds the initial simplex.
const MAX_ITERS: u64 = 500;
const SD_TOLERANCE: f64 = 1e-9;
const INITIAL_STEP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Innovations {
    Normal,
    /// Fixed degrees of freedom, > 2.
    StudentT { df: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GarchSpec {
    pub innovations: Innovations,
    pub variance_targeting: bool,
}

impl GarchSpec {
    /// Number of free parameters, used by AIC/BIC.
    #[inline]
    pub fn free_params(&self) -> usize {
        if self.variance_targeting {
            2
        } else {
            3
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GarchFit {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    /// Conditional variances, ascending time, one per residual.
    pub variance_path: Vec<f64>,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_obs: usize,
    pub iterations: usize,
    pub converged: bool,
}

impl GarchFit {
    #[inline]
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Long-run variance omega / (1 - alpha - beta).
    #[inline]
    pub fn unconditional_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    #[inline]
    pub fn current_variance(&self) -> f64 {
        self.variance_path.last().copied().unwrap_or(MIN_VARIANCE)
    }

    /// One-step-ahead variance: omega + alpha * eps_now^2 + beta * sigma^2_now.
    #[inline]
    pub fn forecast_next(&self, last_residual: f64) -> f64 {
        (self.omega + self.alpha * last_residual * last_residual + self.beta * self.current_variance())
            .max(MIN_VARIANCE)
    }

    /// Total variance over `h` steps given the one-step forecast:
    ///   sigma^2_{T+k} = V + p^(k-1) * (sigma^2_{T+1} - V),  V = long-run variance
    /// summed in closed form (p < 1 for every accepted fit).
    pub fn horizon_variance(&self, next_variance: f64, h: usize) -> f64 {
        let h = h.max(1);
        let p = self.persistence();
        let long_run = self.unconditional_variance();
        let steps = i32::try_from(h).unwrap_or(i32::MAX);
        let decay_sum = (1.0 - p.powi(steps)) / (1.0 - p);
        (h as f64 * long_run + decay_sum * (next_variance - long_run)).max(MIN_VARIANCE)
    }

    pub fn summary(&self) -> GarchSummary {
        GarchSummary {
            omega: self.omega,
            alpha: self.alpha,
            beta: self.beta,
            persistence: self.persistence(),
            uncond_var: self.unconditional_variance(),
            loglik: self.log_likelihood,
            aic: self.aic,
            bic: self.bic,
        }
    }
}

/// Fit GARCH(1,1) to `residuals` (ascending time).
///
/// Returns None when fewer than `MIN_RESIDUALS` finite residuals are
/// available or the optimizer never leaves the infeasible region.
pub fn fit_garch11(residuals: &[f64], spec: &GarchSpec) -> Option<GarchFit> {
    let eps: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
    if eps.len() < MIN_RESIDUALS {
        return None;
    }
    if let Innovations::StudentT { df } = spec.innovations {
        if !(df > 2.0) {
            return None;
        }
    }

    let n = eps.len() as f64;
    let mean = eps.iter().sum::<f64>() / n;
    let sample_var = (eps.iter().map(|e| (e - mean) * (e - mean)).sum::<f64>() / n).max(MIN_VARIANCE);

    // Starting point: alpha=0.05, beta=0.90, omega from the stationarity identity
    let p0 = START_ALPHA + START_BETA;
    let theta_p = logit(p0 / (1.0 - STATIONARITY_EPS));
    let theta_s = logit(START_ALPHA / p0);
    let omega0 = (1.0 - p0) * sample_var;

    let start = [theta_p, theta_s, omega0.ln()];
    let dim = if spec.variance_targeting { 2 } else { 3 };

    let objective = GarchObjective {
        eps: &eps,
        sample_var,
        spec: *spec,
    };
    let solver = match NelderMead::new(initial_simplex(&start[..dim])).with_sd_tolerance(SD_TOLERANCE) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "garch solver setup failed");
            return None;
        }
    };
    let result = match Executor::new(objective, solver)
        .configure(|state| state.max_iters(MAX_ITERS))
        .run()
    {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(n_obs = eps.len(), error = %e, "garch optimization failed");
            return None;
        }
    };

    let state = result.state();
    if !state.get_best_cost().is_finite() {
        tracing::debug!(n_obs = eps.len(), "garch fit stayed infeasible");
        return None;
    }
    let theta = state.get_best_param()?;
    let iterations = state.get_iter() as usize;
    let converged = matches!(state.get_termination_reason(), Some(TerminationReason::SolverConverged));

    let (omega, alpha, beta) = decode(theta, sample_var, spec.variance_targeting)?;
    let mut path = Vec::with_capacity(eps.len());
    let ll = log_likelihood(&eps, omega, alpha, beta, sample_var, spec.innovations, Some(&mut path));
    if !ll.is_finite() {
        return None;
    }

    let k = spec.free_params() as f64;
    Some(GarchFit {
        omega,
        alpha,
        beta,
        variance_path: path,
        log_likelihood: ll,
        aic: 2.0 * k - 2.0 * ll,
        bic: k * n.ln() - 2.0 * ll,
        n_obs: eps.len(),
        iterations,
        converged,
    })
}

/// Negative log-likelihood over the unconstrained search coordinates.
/// Infeasible or non-finite points cost +infinity.
struct GarchObjective<'a> {
    eps: &'a [f64],
    sample_var: f64,
    spec: GarchSpec,
}

impl GarchObjective<'_> {
    fn value(&self, theta: &[f64]) -> f64 {
        let Some((omega, alpha, beta)) = decode(theta, self.sample_var, self.spec.variance_targeting) else {
            return f64::INFINITY;
        };
        let ll = log_likelihood(self.eps, omega, alpha, beta, self.sample_var, self.spec.innovations, None);
        if ll.is_finite() {
            -ll
        } else {
            f64::INFINITY
        }
    }
}

impl CostFunction for GarchObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(self.value(theta))
    }
}

/// Start point plus one vertex per coordinate, offset by `INITIAL_STEP`.
fn initial_simplex(start: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += INITIAL_STEP;
        simplex.push(vertex);
    }
    simplex
}

/// Inverse of the logistic function for p in (0, 1).
#[inline]
fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Map unconstrained search coordinates to (omega, alpha, beta).
fn decode(theta: &[f64], sample_var: f64, targeting: bool) -> Option<(f64, f64, f64)> {
    let p = (1.0 - STATIONARITY_EPS) * logistic(theta[0]);
    let s = logistic(theta[1]);
    let alpha = p * s;
    let beta = p * (1.0 - s);
    if !(alpha >= 0.0 && beta >= 0.0) || alpha + beta >= 1.0 - STATIONARITY_EPS {
        return None;
    }
    let omega = if targeting {
        (1.0 - alpha - beta) * sample_var
    } else {
        theta.get(2)?.exp()
    };
    if !(omega > 0.0) || !omega.is_finite() {
        return None;
    }
    Some((omega, alpha, beta))
}

/// Log-likelihood of the residuals under the running conditional variance.
/// Writes the variance path when `path` is given.
fn log_likelihood(
    eps: &[f64],
    omega: f64,
    alpha: f64,
    beta: f64,
    seed_var: f64,
    innovations: Innovations,
    mut path: Option<&mut Vec<f64>>,
) -> f64 {
    let t_const = match innovations {
        Innovations::Normal => 0.0,
        Innovations::StudentT { df } => {
            ln_gamma(0.5 * (df + 1.0)) - ln_gamma(0.5 * df) - 0.5 * (df * std::f64::consts::PI).ln()
        }
    };

    let mut ll = 0.0;
    let mut var = seed_var.max(MIN_VARIANCE);
    for (t, &e) in eps.iter().enumerate() {
        if t > 0 {
            let prev = eps[t - 1];
            var = (omega + alpha * prev * prev + beta * var).max(MIN_VARIANCE);
        }
        if let Some(p) = path.as_deref_mut() {
            p.push(var);
        }
        ll += match innovations {
            Innovations::Normal => -0.5 * (LN_2PI + var.ln() + e * e / var),
            Innovations::StudentT { df } => {
                // Scale chosen so the innovation variance equals var
                let scale_sq = var * (df - 2.0) / df;
                t_const - 0.5 * scale_sq.ln() - 0.5 * (df + 1.0) * (e * e / (df * scale_sq)).ln_1p()
            }
        };
    }
    ll
}

/// GARCH-Normal / GARCH-t forecaster: fits a fresh model on each row's own
/// residual window.
pub struct GarchModel {
    name: &'static str,
    spec: GarchSpec,
    window: usize,
    critical: f64,
}

impl GarchModel {
    pub fn new(vars: &Variables) -> Self {
        let df = vars.innovations_df as f64;
        let (name, innovations, critical) = match vars.vol_model {
            VolModel::GarchT => (
                "GARCH_T",
                Innovations::StudentT { df },
                two_sided_critical(vars.pi_coverage, Some(df)),
            ),
            _ => ("GARCH_NORMAL", Innovations::Normal, two_sided_critical(vars.pi_coverage, None)),
        };
        Self {
            name,
            spec: GarchSpec {
                innovations,
                variance_targeting: vars.variance_targeting,
            },
            window: vars.garch_window(),
            critical,
        }
    }
}

impl VolatilityModel for GarchModel {
    #[inline]
    fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    fn critical_value(&self) -> f64 {
        self.critical
    }

    fn forecast(&self, ctx: &ForecastContext<'_>) -> Result<VolForecast, RowReason> {
        let window = ctx
            .returns
            .trailing_window(ctx.index, self.window)
            .ok_or(RowReason::InsufficientHistory)?;

        // Window is newest-first; the fitter wants ascending time
        let residuals: Vec<f64> = window.iter().rev().map(|r| r - ctx.drift).collect();
        let fit = fit_garch11(&residuals, &self.spec).ok_or(RowReason::InsufficientHistory)?;

        let eps_now = residuals.last().copied().unwrap_or(0.0);
        let variance_1d = fit.forecast_next(eps_now);
        let variance_h = fit.horizon_variance(variance_1d, ctx.horizon);

        tracing::trace!(
            row = ctx.index,
            alpha = fit.alpha,
            beta = fit.beta,
            iterations = fit.iterations,
            converged = fit.converged,
            "garch fit"
        );

        Ok(VolForecast {
            variance_1d,
            variance_h,
            source: VolSource::Garch,
            garch: Some(fit.summary()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic standard-normal-ish shocks (LCG + Box-Muller).
    fn shocks(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 11) as f64 + 0.5) / (1u64 << 53) as f64
        };
        (0..n)
            .map(|_| {
                let u1 = next();
                let u2 = next();
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
            })
            .collect()
    }

    /// Alternating calm and volatile segments: strong variance clustering.
    fn clustered(n: usize) -> Vec<f64> {
        let z = shocks(n, 7);
        z.iter()
            .enumerate()
            .map(|(i, z)| if (i / 15) % 2 == 0 { 0.004 * z } else { 0.03 * z })
            .collect()
    }

    fn normal_spec() -> GarchSpec {
        GarchSpec { innovations: Innovations::Normal, variance_targeting: false }
    }

    #[test]
    fn test_too_few_residuals_no_fit() {
        assert!(fit_garch11(&[0.01, -0.02, 0.0, 0.01], &normal_spec()).is_none());
        assert!(fit_garch11(&[0.01, f64::NAN, -0.02, 0.0, 0.01], &normal_spec()).is_none());
        assert!(fit_garch11(&[0.01, -0.02, 0.0, 0.01, 0.005], &normal_spec()).is_some());
    }

    #[test]
    fn test_clustered_series_recovers_persistence() {
        let fit = fit_garch11(&clustered(60), &normal_spec()).expect("fit");
        assert!(fit.persistence() > 0.5, "alpha+beta={} should be persistent", fit.persistence());
        assert!(fit.alpha >= 0.0 && fit.beta >= 0.0);
        assert!(fit.persistence() < 1.0 - STATIONARITY_EPS);
    }

    #[test]
    fn test_constraints_hold_for_all_specs() {
        let data = [clustered(80), shocks(80, 3).iter().map(|z| 0.01 * z).collect()];
        let specs = [
            normal_spec(),
            GarchSpec { innovations: Innovations::Normal, variance_targeting: true },
            GarchSpec { innovations: Innovations::StudentT { df: 5.0 }, variance_targeting: false },
            GarchSpec { innovations: Innovations::StudentT { df: 4.0 }, variance_targeting: true },
        ];
        for series in &data {
            for spec in &specs {
                let fit = fit_garch11(series, spec).expect("fit");
                assert!(fit.alpha >= 0.0, "alpha={}", fit.alpha);
                assert!(fit.beta >= 0.0, "beta={}", fit.beta);
                assert!(fit.persistence() < 1.0, "alpha+beta={}", fit.persistence());
                assert!(fit.omega > 0.0);
                assert_eq!(fit.variance_path.len(), series.len());
                assert!(fit.variance_path.iter().all(|v| *v > 0.0 && v.is_finite()));
            }
        }
    }

    #[test]
    fn test_variance_targeting_ties_omega_to_sample_variance() {
        let series = clustered(60);
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let var = series.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        let spec = GarchSpec { innovations: Innovations::Normal, variance_targeting: true };
        let fit = fit_garch11(&series, &spec).expect("fit");
        assert!((fit.unconditional_variance() - var).abs() / var < 1e-9, "long-run var should equal sample var");
        // k = 2 under targeting
        assert!((fit.aic - (4.0 - 2.0 * fit.log_likelihood)).abs() < 1e-9);
        assert!((fit.bic - (2.0 * n.ln() - 2.0 * fit.log_likelihood)).abs() < 1e-9);
    }

    #[test]
    fn test_information_criteria_three_params() {
        let series = clustered(60);
        let fit = fit_garch11(&series, &normal_spec()).expect("fit");
        assert!((fit.aic - (6.0 - 2.0 * fit.log_likelihood)).abs() < 1e-9);
        assert!((fit.bic - (3.0 * 60f64.ln() - 2.0 * fit.log_likelihood)).abs() < 1e-9);
    }

    #[test]
    fn test_fit_improves_on_starting_point() {
        let series = clustered(60);
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let var = series.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        let start_ll = log_likelihood(&series, 0.05 * var, START_ALPHA, START_BETA, var, Innovations::Normal, None);
        let fit = fit_garch11(&series, &normal_spec()).expect("fit");
        assert!(fit.log_likelihood >= start_ll - 1e-9, "fit {} vs start {}", fit.log_likelihood, start_ll);
    }

    #[test]
    fn test_student_t_likelihood_matches_density() {
        // Single observation, constant variance: compare against the closed form.
        let df = 5.0;
        let var = 0.0004;
        let e = 0.03;
        let ll = log_likelihood(&[e], 1e-6, 0.0, 0.0, var, Innovations::StudentT { df }, None);
        let scale = (var * (df - 2.0) / df).sqrt();
        let z = e / scale;
        let expected = crate::numerics::special::student_t_ln_pdf(z, df) - scale.ln();
        assert!((ll - expected).abs() < 1e-12, "ll={ll}, expected={expected}");
    }

    #[test]
    fn test_normal_likelihood_matches_density() {
        let var = 0.0004;
        let e = -0.01;
        let ll = log_likelihood(&[e], 1e-6, 0.0, 0.0, var, Innovations::Normal, None);
        let expected = -0.5 * (2.0 * std::f64::consts::PI * var).ln() - e * e / (2.0 * var);
        assert!((ll - expected).abs() < 1e-12);
    }

    #[test]
    fn test_forecast_formulas() {
        let fit = GarchFit {
            omega: 1e-6,
            alpha: 0.1,
            beta: 0.8,
            variance_path: vec![2e-4, 3e-4],
            log_likelihood: 0.0,
            aic: 0.0,
            bic: 0.0,
            n_obs: 2,
            iterations: 0,
            converged: true,
        };
        let next = fit.forecast_next(0.02);
        assert!((next - (1e-6 + 0.1 * 4e-4 + 0.8 * 3e-4)).abs() < 1e-15);
        assert!((fit.horizon_variance(next, 1) - next).abs() < 1e-14);

        let long_run = fit.unconditional_variance();
        assert!((long_run - 1e-5).abs() < 1e-15);
        let two = fit.horizon_variance(next, 2);
        let expected = next + long_run + 0.9 * (next - long_run);
        assert!((two - expected).abs() < 1e-14);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let series = clustered(60);
        let a = fit_garch11(&series, &normal_spec()).unwrap();
        let b = fit_garch11(&series, &normal_spec()).unwrap();
        assert_eq!(a.alpha.to_bits(), b.alpha.to_bits());
        assert_eq!(a.beta.to_bits(), b.beta.to_bits());
        assert_eq!(a.omega.to_bits(), b.omega.to_bits());
        assert_eq!(a.iterations, b.iterations);
    }

    fn objective_for(series: &[f64], spec: GarchSpec) -> (GarchObjective<'_>, f64) {
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let var = series.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        (GarchObjective { eps: series, sample_var: var, spec }, var)
    }

    #[test]
    fn test_objective_infeasible_points_cost_infinity() {
        let series = clustered(60);
        let (obj, _) = objective_for(&series, normal_spec());
        // logistic saturates: alpha + beta reaches 1 - EPS
        assert_eq!(obj.value(&[1e3, 0.0, -10.0]), f64::INFINITY);
        assert_eq!(obj.value(&[f64::NAN, 0.0, -10.0]), f64::INFINITY, "NaN never reaches the solver");
        assert_eq!(obj.value(&[0.0, 0.0, f64::INFINITY]), f64::INFINITY);
        assert!(obj.value(&[0.0, 0.0, -10.0]).is_finite());
        assert_eq!(obj.cost(&vec![1e3, 0.0, -10.0]).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_fit_not_worse_than_initial_simplex() {
        let series = clustered(60);
        for spec in [normal_spec(), GarchSpec { innovations: Innovations::StudentT { df: 6.0 }, variance_targeting: true }] {
            let (obj, var) = objective_for(&series, spec);
            let p0 = START_ALPHA + START_BETA;
            let start = [logit(p0 / (1.0 - STATIONARITY_EPS)), logit(START_ALPHA / p0), ((1.0 - p0) * var).ln()];
            let dim = if spec.variance_targeting { 2 } else { 3 };
            let fit = fit_garch11(&series, &spec).expect("fit");
            for vertex in initial_simplex(&start[..dim]) {
                assert!(
                    -fit.log_likelihood <= obj.value(&vertex) + 1e-9,
                    "fit {} worse than vertex {}",
                    -fit.log_likelihood,
                    obj.value(&vertex)
                );
            }
        }
    }

    #[test]
    fn test_initial_simplex_shape() {
        let s = initial_simplex(&[1.0, 2.0]);
        assert_eq!(s, vec![vec![1.0, 2.0], vec![1.5, 2.0], vec![1.0, 2.5]]);
    }

    #[test]
    fn test_iteration_cap_respected() {
        let fit = fit_garch11(&clustered(80), &normal_spec()).expect("fit");
        assert!(fit.iterations as u64 <= MAX_ITERS, "iterations={}", fit.iterations);
    }
}
