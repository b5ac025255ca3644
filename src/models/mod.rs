pub mod garch;
pub mod gbm;
pub mod har_rv;

use crate::returns::{ReturnSeries, WindowStats};
use crate::rows::{RowReason, VolSource};
use crate::variables::{VolModel, Variables};

/// All volatility models implement this trait.
/// forecast() must be a pure function of its context: no state carried
/// between rows. Send + Sync so rows can be forecast from any thread.
pub trait VolatilityModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Two-sided critical value for the run's coverage. Fixed per run.
    fn critical_value(&self) -> f64;

    /// One-step and h-step variance forecasts for the row in `ctx`.
    /// Missing prerequisites come back as the row's reason, never a panic.
    fn forecast(&self, ctx: &ForecastContext<'_>) -> Result<VolForecast, RowReason>;
}

/// Everything a model may look at for a single row.
#[derive(Debug, Clone, Copy)]
pub struct ForecastContext<'a> {
    /// Row index, newest-first.
    pub index: usize,
    pub returns: &'a ReturnSeries,
    /// Trailing-window drift/vol estimates for this row.
    pub stats: WindowStats,
    /// Shrunk drift (`lambda * mu_star_hat`).
    pub drift: f64,
    /// Realized volatility per row, newest-first.
    pub realized_vol: &'a [Option<f64>],
    pub horizon: usize,
}

/// Fitted GARCH quantities reported on the row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GarchSummary {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    pub persistence: f64,
    pub uncond_var: f64,
    pub loglik: f64,
    pub aic: f64,
    pub bic: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolForecast {
    pub variance_1d: f64,
    /// Total variance accumulated over the horizon.
    pub variance_h: f64,
    pub source: VolSource,
    pub garch: Option<GarchSummary>,
}

impl VolForecast {
    #[inline]
    pub fn sigma_1d(&self) -> f64 {
        self.variance_1d.max(0.0).sqrt()
    }

    #[inline]
    pub fn sigma_h(&self) -> f64 {
        self.variance_h.max(0.0).sqrt()
    }
}

/// Instantiate the model selected by `vars.vol_model`.
pub fn build_model(vars: &Variables) -> Box<dyn VolatilityModel> {
    match vars.vol_model {
        VolModel::Gbm => Box::new(gbm::GbmModel::new(vars.pi_coverage)),
        VolModel::GarchNormal | VolModel::GarchT => Box::new(garch::GarchModel::new(vars)),
        VolModel::HarRv => Box::new(har_rv::HarRvModel::new(vars.pi_coverage, vars.window_days)),
    }
}
