use crate::rows::BreakoutDirection;

/// Floor applied to sigma when standardizing a realized move.
pub const SIGMA_FLOOR: f64 = 1e-9;

/// Log-normal prediction interval around `P * exp(drift)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionInterval {
    pub expected: f64,
    pub lower: f64,
    pub upper: f64,
    pub band_width_bp: f64,
}

/// lower = P * exp(d - c*sigma), upper = P * exp(d + c*sigma)
#[inline]
pub fn prediction_interval(price: f64, drift: f64, sigma: f64, critical: f64) -> PredictionInterval {
    let half = critical * sigma.max(0.0);
    let lower = price * (drift - half).exp();
    let upper = price * (drift + half).exp();
    PredictionInterval {
        expected: price * drift.exp(),
        lower,
        upper,
        band_width_bp: 10_000.0 * (upper / lower - 1.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutScore {
    pub z_score: f64,
    pub direction: BreakoutDirection,
    /// Percent beyond the breached bound; 0 inside the band.
    pub pct_outside: f64,
    pub breakout: bool,
}

/// Score the chronologically-next price against an interval.
pub fn score_breakout(
    price: f64,
    next_price: f64,
    drift: f64,
    sigma: f64,
    interval: &PredictionInterval,
) -> BreakoutScore {
    let z_score = (next_price.ln() - price.ln() - drift) / sigma.max(SIGMA_FLOOR);

    let (direction, pct_outside) = if next_price > interval.upper {
        (BreakoutDirection::Up, 100.0 * (next_price / interval.upper - 1.0))
    } else if next_price < interval.lower {
        (BreakoutDirection::Down, 100.0 * (next_price / interval.lower - 1.0))
    } else {
        (BreakoutDirection::In, 0.0)
    };

    BreakoutScore {
        z_score,
        direction,
        pct_outside,
        breakout: direction != BreakoutDirection::In,
    }
}
