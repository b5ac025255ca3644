use crate::diagnostics::{self, Diagnostics, RunFacts};
use crate::errors::EngineResult;
use crate::interval::{prediction_interval, score_breakout};
use crate::models::{build_model, ForecastContext, VolatilityModel};
use crate::returns::{rolling_stats, ReturnSeries, WindowStats};
use crate::rows::{ComputedRow, InputRow, RowReason};
use crate::variables::{normalize, RawConfigBag, Variables};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ComputeOutput {
    pub rows: Vec<ComputedRow>,
    pub diagnostics: Diagnostics,
}

/// Validate `bag`, then compute every row. Only configuration errors fail.
pub fn compute(rows: &[InputRow], bag: &RawConfigBag) -> EngineResult<ComputeOutput> {
    let vars = normalize(bag)?;
    Ok(compute_with(rows, &vars))
}

/// Compute against already-validated variables. Rows are newest-first and
/// come back in the same order.
pub fn compute_with(rows: &[InputRow], vars: &Variables) -> ComputeOutput {
    let returns = ReturnSeries::from_rows(rows);
    let stats = rolling_stats(&returns, vars.window_days);
    let realized: Vec<Option<f64>> = rows.iter().map(InputRow::realized_vol).collect();
    let model = build_model(vars);

    let mut model_failures = 0usize;
    let computed: Vec<ComputedRow> = rows
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let row = compute_row(i, input, &returns, stats[i], &realized, model.as_ref(), vars);
            if stats[i].is_some()
                && row.price.is_some()
                && row.vol_source.is_none()
                && row.diagnostics_reason == RowReason::InsufficientHistory
            {
                model_failures += 1;
            }
            row
        })
        .collect();

    let facts = RunFacts {
        model: model.name(),
        critical_value: model.critical_value(),
        model_failures,
    };
    let diagnostics = diagnostics::summarize(vars, rows, &computed, facts);

    tracing::info!(
        model = facts.model,
        rows = computed.len(),
        scored = diagnostics.breakout_summary.scored,
        "compute finished"
    );

    ComputeOutput {
        rows: computed,
        diagnostics,
    }
}

fn compute_row(
    i: usize,
    input: &InputRow,
    returns: &ReturnSeries,
    stats: Option<WindowStats>,
    realized: &[Option<f64>],
    model: &dyn VolatilityModel,
    vars: &Variables,
) -> ComputedRow {
    let mut row = ComputedRow::empty(input.date, RowReason::Ok);
    row.log_return = returns.log_return(i);
    row.simple_return = returns.simple_return(i);

    let Some(price) = returns.price(i) else {
        row.diagnostics_reason = RowReason::MissingPrice;
        return row;
    };
    row.price = Some(price);

    let Some(stats) = stats else {
        row.diagnostics_reason = RowReason::InsufficientHistory;
        return row;
    };
    let drift = vars.drift_shrinkage_lambda * stats.mean;
    row.mu_star_hat = Some(stats.mean);
    row.sigma_hat = Some(stats.std_dev);
    row.mu_star_used = Some(drift);

    let ctx = ForecastContext {
        index: i,
        returns,
        stats,
        drift,
        realized_vol: realized,
        horizon: vars.horizon_h_days,
    };
    let forecast = match model.forecast(&ctx) {
        Ok(f) => f,
        Err(reason) => {
            row.diagnostics_reason = reason;
            return row;
        }
    };

    let c = model.critical_value();
    let sigma = forecast.sigma_1d();
    row.vol_source = Some(forecast.source);
    row.var_forecast_1d = Some(forecast.variance_1d);
    row.sigma_forecast_1d = Some(sigma);
    row.critical_value = Some(c);

    let pi = prediction_interval(price, drift, sigma, c);
    row.expected_price_next_1d = Some(pi.expected);
    row.pi_lower_1d = Some(pi.lower);
    row.pi_upper_1d = Some(pi.upper);
    row.band_width_bp = Some(pi.band_width_bp);

    let h = vars.horizon_h_days.max(1) as f64;
    let sigma_h = forecast.sigma_h();
    let pi_h = prediction_interval(price, h * drift, sigma_h, c);
    row.sigma_forecast_h = Some(sigma_h);
    row.expected_price_h = Some(pi_h.expected);
    row.pi_lower_h = Some(pi_h.lower);
    row.pi_upper_h = Some(pi_h.upper);

    if let Some(g) = forecast.garch {
        row.garch_omega = Some(g.omega);
        row.garch_alpha = Some(g.alpha);
        row.garch_beta = Some(g.beta);
        row.garch_persistence = Some(g.persistence);
        row.garch_uncond_var = Some(g.uncond_var);
        row.garch_loglik = Some(g.loglik);
        row.garch_aic = Some(g.aic);
        row.garch_bic = Some(g.bic);
    }

    // the chronologically-next observation sits one row newer
    let Some(next) = i.checked_sub(1).and_then(|j| returns.price(j)) else {
        row.diagnostics_reason = RowReason::NoNextDay;
        return row;
    };
    row.realized_next_price = Some(next);

    if vars.skip_earnings && input.earnings_flag {
        row.diagnostics_reason = RowReason::SkipEarnings;
        return row;
    }

    let score = score_breakout(price, next, drift, sigma, &pi);
    row.z_score = Some(score.z_score);
    row.breakout = Some(score.breakout);
    row.breakout_direction = Some(score.direction);
    row.pct_outside = Some(score.pct_outside);
    row
}
