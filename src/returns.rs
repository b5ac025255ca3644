use crate::rows::InputRow;

/// Per-row returns for a newest-first price series.
///
/// Row `i` pairs with row `i + 1` (the chronologically earlier observation):
///   log_return[i]    = ln(P_i / P_{i+1})
///   simple_return[i] = P_i / P_{i+1} - 1
///
/// The oldest row never has a return.
#[derive(Debug, Clone)]
pub struct ReturnSeries {
    prices: Vec<Option<f64>>,
    log_returns: Vec<Option<f64>>,
    simple_returns: Vec<Option<f64>>,
}

impl ReturnSeries {
    pub fn from_rows(rows: &[InputRow]) -> Self {
        Self::from_prices(rows.iter().map(InputRow::price).collect())
    }

    pub fn from_prices(prices: Vec<Option<f64>>) -> Self {
        let n = prices.len();
        let mut log_returns = vec![None; n];
        let mut simple_returns = vec![None; n];

        for i in 0..n.saturating_sub(1) {
            if let (Some(p), Some(prev)) = (prices[i], prices[i + 1]) {
                let ratio = p / prev;
                let lr = ratio.ln();
                if lr.is_finite() {
                    log_returns[i] = Some(lr);
                    simple_returns[i] = Some(ratio - 1.0);
                }
            }
        }

        Self {
            prices,
            log_returns,
            simple_returns,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    #[inline]
    pub fn price(&self, i: usize) -> Option<f64> {
        self.prices.get(i).copied().flatten()
    }

    #[inline]
    pub fn log_return(&self, i: usize) -> Option<f64> {
        self.log_returns.get(i).copied().flatten()
    }

    #[inline]
    pub fn simple_return(&self, i: usize) -> Option<f64> {
        self.simple_returns.get(i).copied().flatten()
    }

    /// Log returns `i .. i + len` (newest-first) if every one is present.
    pub fn trailing_window(&self, i: usize, len: usize) -> Option<Vec<f64>> {
        let end = i.checked_add(len)?;
        if len == 0 || end > self.log_returns.len() {
            return None;
        }
        self.log_returns[i..end].iter().copied().collect()
    }
}

/// Population mean and standard deviation of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

/// Population (not Bessel-corrected) moments. None for an empty slice.
pub fn window_stats(values: &[f64]) -> Option<WindowStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    Some(WindowStats {
        mean,
        std_dev: var.max(0.0).sqrt(),
        count: values.len(),
    })
}

/// Trailing-window stats for every row. None where the window is incomplete.
pub fn rolling_stats(series: &ReturnSeries, window: usize) -> Vec<Option<WindowStats>> {
    (0..series.len())
        .map(|i| series.trailing_window(i, window).and_then(|w| window_stats(&w)))
        .collect()
}
