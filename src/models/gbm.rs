use crate::models::{ForecastContext, VolForecast, VolatilityModel};
use crate::numerics::special::two_sided_critical;
use crate::rows::{RowReason, VolSource};

/// Constant-window Gaussian (GBM) volatility.
///
/// sigma_1d = sigma_hat (trailing population std of log returns)
/// sigma_h  = sigma_1d * sqrt(h)
///
/// Critical value is the Normal two-sided quantile, computed once.
pub struct GbmModel {
    critical: f64,
}

impl GbmModel {
    pub fn new(coverage: f64) -> Self {
        Self {
            critical: two_sided_critical(coverage, None),
        }
    }
}

impl VolatilityModel for GbmModel {
    #[inline]
    fn name(&self) -> &'static str {
        "GBM"
    }

    #[inline]
    fn critical_value(&self) -> f64 {
        self.critical
    }

    /// Pure function: reuses the row's rolling estimate.
    #[inline]
    fn forecast(&self, ctx: &ForecastContext<'_>) -> Result<VolForecast, RowReason> {
        let sigma = ctx.stats.std_dev;
        if !sigma.is_finite() {
            return Err(RowReason::InsufficientHistory);
        }
        let variance_1d = sigma * sigma;
        Ok(VolForecast {
            variance_1d,
            variance_h: variance_1d * ctx.horizon.max(1) as f64,
            source: VolSource::Gbm,
            garch: None,
        })
    }
}
