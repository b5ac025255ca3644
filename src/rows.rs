use chrono::NaiveDate;

// ── Input ──

/// One price observation as supplied by the price-history store.
/// Rows arrive newest-first.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputRow {
    pub date: NaiveDate,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub adj_close: Option<f64>,
    /// Daily realized volatility in return units.
    #[serde(default)]
    pub realized_vol: Option<f64>,
    #[serde(default)]
    pub earnings_flag: bool,
}

impl InputRow {
    /// Adjusted close, falling back to close. None unless finite and positive.
    #[inline]
    pub fn price(&self) -> Option<f64> {
        self.adj_close
            .filter(|p| p.is_finite() && *p > 0.0)
            .or_else(|| self.close.filter(|p| p.is_finite() && *p > 0.0))
    }

    #[inline]
    pub fn realized_vol(&self) -> Option<f64> {
        self.realized_vol.filter(|v| v.is_finite() && *v > 0.0)
    }
}

// ── Row conditions ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowReason {
    Ok,
    InsufficientHistory,
    MissingPrice,
    NoNextDay,
    SkipEarnings,
    HarRequirements,
}

impl RowReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InsufficientHistory => "insufficient_history",
            Self::MissingPrice => "missing_price",
            Self::NoNextDay => "no_next_day",
            Self::SkipEarnings => "skip_earnings",
            Self::HarRequirements => "har_requirements",
        }
    }
}

impl std::fmt::Display for RowReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreakoutDirection {
    Up,
    Down,
    In,
}

/// Where the forecast volatility came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolSource {
    Gbm,
    Garch,
    HarRegression,
    HarPassthrough,
}

// ── Output ──

/// Per-row engine output. Composed from, not extending, the input row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComputedRow {
    pub date: NaiveDate,
    pub price: Option<f64>,
    pub log_return: Option<f64>,
    pub simple_return: Option<f64>,

    pub mu_star_hat: Option<f64>,
    pub sigma_hat: Option<f64>,
    pub mu_star_used: Option<f64>,

    pub vol_source: Option<VolSource>,
    pub var_forecast_1d: Option<f64>,
    pub sigma_forecast_1d: Option<f64>,
    pub critical_value: Option<f64>,

    pub expected_price_next_1d: Option<f64>,
    pub pi_lower_1d: Option<f64>,
    pub pi_upper_1d: Option<f64>,
    pub band_width_bp: Option<f64>,

    pub sigma_forecast_h: Option<f64>,
    pub expected_price_h: Option<f64>,
    pub pi_lower_h: Option<f64>,
    pub pi_upper_h: Option<f64>,

    pub realized_next_price: Option<f64>,
    pub z_score: Option<f64>,
    pub breakout: Option<bool>,
    pub breakout_direction: Option<BreakoutDirection>,
    pub pct_outside: Option<f64>,

    pub garch_omega: Option<f64>,
    pub garch_alpha: Option<f64>,
    pub garch_beta: Option<f64>,
    pub garch_persistence: Option<f64>,
    pub garch_uncond_var: Option<f64>,
    pub garch_loglik: Option<f64>,
    pub garch_aic: Option<f64>,
    pub garch_bic: Option<f64>,

    pub diagnostics_reason: RowReason,
}

impl ComputedRow {
    /// Empty row for `date`; every computed field starts unset.
    pub fn empty(date: NaiveDate, reason: RowReason) -> Self {
        Self {
            date,
            price: None,
            log_return: None,
            simple_return: None,
            mu_star_hat: None,
            sigma_hat: None,
            mu_star_used: None,
            vol_source: None,
            var_forecast_1d: None,
            sigma_forecast_1d: None,
            critical_value: None,
            expected_price_next_1d: None,
            pi_lower_1d: None,
            pi_upper_1d: None,
            band_width_bp: None,
            sigma_forecast_h: None,
            expected_price_h: None,
            pi_lower_h: None,
            pi_upper_h: None,
            realized_next_price: None,
            z_score: None,
            breakout: None,
            breakout_direction: None,
            pct_outside: None,
            garch_omega: None,
            garch_alpha: None,
            garch_beta: None,
            garch_persistence: None,
            garch_uncond_var: None,
            garch_loglik: None,
            garch_aic: None,
            garch_bic: None,
            diagnostics_reason: reason,
        }
    }
}
