//! HAR-RV (heterogeneous autoregressive realized volatility).
//!
//! RV_{t+1} = b0 + b_d * RV_t + b_w * avg(RV, 5) + b_m * avg(RV, 22)
//!
//! Coefficients come from OLS on the rows chronologically before the one
//! being forecast, so no row ever sees its own future. When the history is
//! too short, or the normal equations are singular, the row's own realized
//! volatility is passed through as the one-step forecast.

use crate::models::{ForecastContext, VolForecast, VolatilityModel};
use crate::numerics::special::two_sided_critical;
use crate::rows::{RowReason, VolSource};

const WEEK: usize = 5;
const MONTH: usize = 22;
const MIN_TARGETS: usize = 8;
const N_COEF: usize = 4;

pub struct HarRvModel {
    critical: f64,
    n_targets: usize,
}

impl HarRvModel {
    pub fn new(coverage: f64, window_days: usize) -> Self {
        Self {
            critical: two_sided_critical(coverage, None),
            n_targets: window_days.max(MIN_TARGETS),
        }
    }
}

impl VolatilityModel for HarRvModel {
    #[inline]
    fn name(&self) -> &'static str {
        "HAR_RV"
    }

    #[inline]
    fn critical_value(&self) -> f64 {
        self.critical
    }

    fn forecast(&self, ctx: &ForecastContext<'_>) -> Result<VolForecast, RowReason> {
        let current = ctx
            .realized_vol
            .get(ctx.index)
            .copied()
            .flatten()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or(RowReason::HarRequirements)?;

        let (sigma, source) = match regress(ctx.realized_vol, ctx.index, self.n_targets) {
            Some(coef) => match features(ctx.realized_vol, ctx.index).map(|x| dot(&coef, &x)) {
                Some(pred) if pred.is_finite() && pred > 0.0 => (pred, VolSource::HarRegression),
                _ => (current, VolSource::HarPassthrough),
            },
            None => (current, VolSource::HarPassthrough),
        };

        tracing::trace!(index = ctx.index, sigma, source = ?source, "HAR forecast");

        let variance_1d = sigma * sigma;
        Ok(VolForecast {
            variance_1d,
            variance_h: variance_1d * ctx.horizon.max(1) as f64,
            source,
            garch: None,
        })
    }
}

/// Regressor vector `[1, RV_j, avg5_j, avg22_j]` at newest-first index `j`.
/// Needs RV at `j .. j + 22`, all present and positive.
fn features(rv: &[Option<f64>], j: usize) -> Option<[f64; N_COEF]> {
    let end = j.checked_add(MONTH)?;
    if end > rv.len() {
        return None;
    }
    let mut month = [0.0; MONTH];
    for (slot, v) in month.iter_mut().zip(&rv[j..end]) {
        *slot = v.filter(|x| x.is_finite() && *x > 0.0)?;
    }
    let weekly = month[..WEEK].iter().sum::<f64>() / WEEK as f64;
    let monthly = month.iter().sum::<f64>() / MONTH as f64;
    Some([1.0, month[0], weekly, monthly])
}

#[inline]
fn dot(a: &[f64; N_COEF], b: &[f64; N_COEF]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// OLS coefficients fitted on the `n_targets` most recent (target, features)
/// pairs strictly older than the forecast row. Target for features at `j` is
/// RV at `j - 1`; the forecast row's own RV is the newest admissible target.
fn regress(rv: &[Option<f64>], index: usize, n_targets: usize) -> Option<[f64; N_COEF]> {
    let mut xtx = [0.0; N_COEF * N_COEF];
    let mut xty = [0.0; N_COEF];

    for j in (index + 1)..=(index + n_targets) {
        let x = features(rv, j)?;
        let y = rv[j - 1].filter(|v| v.is_finite() && *v > 0.0)?;
        for r in 0..N_COEF {
            xty[r] += x[r] * y;
            for c in 0..N_COEF {
                xtx[r * N_COEF + c] += x[r] * x[c];
            }
        }
    }

    solve_cholesky(&xtx, &xty)
}

/// Solve `A x = b` for symmetric positive-definite `A` (row-major).
/// None when `A` is not numerically positive definite.
fn solve_cholesky(a: &[f64; N_COEF * N_COEF], b: &[f64; N_COEF]) -> Option<[f64; N_COEF]> {
    let n = N_COEF;
    let mut l = [0.0; N_COEF * N_COEF];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                // relative tolerance: regressors live on very different scales
                if sum <= 1e-12 * a[i * n + i].abs() || sum <= 0.0 {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    let mut y = [0.0; N_COEF];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = [0.0; N_COEF];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}
