use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::rows::{BreakoutDirection, ComputedRow, InputRow};
use crate::variables::{VolModel, Variables};

/// Run-level report. Built after every row is computed; never fails.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostics {
    pub variables: Variables,
    pub model: &'static str,
    pub critical_value: f64,
    pub row_count: usize,
    /// Non-null occurrences per output field.
    pub field_coverage: BTreeMap<String, usize>,
    pub reason_counts: BTreeMap<String, usize>,
    pub sample: Vec<SampleRow>,
    pub breakout_summary: BreakoutSummary,
    pub warnings: SmallVec<[String; 4]>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SampleRow {
    pub index: usize,
    pub row: ComputedRow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct BreakoutSummary {
    pub scored: usize,
    pub up: usize,
    pub down: usize,
    pub inside: usize,
    /// Realized share of scored rows outside the band. None when nothing was scored.
    pub breakout_rate: Option<f64>,
    /// `1 - pi_coverage`.
    pub nominal_rate: f64,
}

/// Inputs the engine hands over besides the rows themselves.
#[derive(Debug, Clone, Copy)]
pub struct RunFacts {
    pub model: &'static str,
    pub critical_value: f64,
    /// Rows with a full drift window where the model still produced no forecast.
    pub model_failures: usize,
}

pub fn summarize(
    variables: &Variables,
    inputs: &[InputRow],
    rows: &[ComputedRow],
    facts: RunFacts,
) -> Diagnostics {
    let mut reason_counts = BTreeMap::new();
    for r in rows {
        *reason_counts.entry(r.diagnostics_reason.as_str().to_string()).or_insert(0) += 1;
    }

    Diagnostics {
        variables: variables.clone(),
        model: facts.model,
        critical_value: facts.critical_value,
        row_count: rows.len(),
        field_coverage: field_coverage(rows),
        reason_counts,
        sample: sample(rows),
        breakout_summary: breakout_summary(rows, variables.pi_coverage),
        warnings: warnings(variables, inputs, facts),
    }
}

fn field_coverage(rows: &[ComputedRow]) -> BTreeMap<String, usize> {
    let mut coverage = BTreeMap::new();
    for row in rows {
        // a row that fails to serialize simply contributes nothing
        let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(row) else {
            continue;
        };
        for (key, value) in fields {
            let slot = coverage.entry(key).or_insert(0usize);
            if !value.is_null() {
                *slot += 1;
            }
        }
    }
    coverage
}

/// First, middle and last row (deduplicated for short runs).
fn sample(rows: &[ComputedRow]) -> Vec<SampleRow> {
    if rows.is_empty() {
        return Vec::new();
    }
    let mut picks = vec![0, rows.len() / 2, rows.len() - 1];
    picks.dedup();
    picks
        .into_iter()
        .map(|index| SampleRow {
            index,
            row: rows[index].clone(),
        })
        .collect()
}

fn breakout_summary(rows: &[ComputedRow], coverage: f64) -> BreakoutSummary {
    let mut s = BreakoutSummary {
        nominal_rate: 1.0 - coverage,
        ..Default::default()
    };
    for dir in rows.iter().filter_map(|r| r.breakout_direction) {
        s.scored += 1;
        match dir {
            BreakoutDirection::Up => s.up += 1,
            BreakoutDirection::Down => s.down += 1,
            BreakoutDirection::In => s.inside += 1,
        }
    }
    if s.scored > 0 {
        s.breakout_rate = Some((s.up + s.down) as f64 / s.scored as f64);
    }
    s
}

fn warnings(variables: &Variables, inputs: &[InputRow], facts: RunFacts) -> SmallVec<[String; 4]> {
    let mut out = SmallVec::new();

    let out_of_order = inputs.windows(2).filter(|w| w[0].date <= w[1].date).count();
    if out_of_order > 0 {
        out.push(format!(
            "input dates are not strictly descending ({out_of_order} adjacent pairs); returns assume newest-first order"
        ));
    }

    if variables.vol_model == VolModel::HarRv {
        let missing = inputs.iter().filter(|r| r.realized_vol().is_none()).count();
        if missing > 0 {
            out.push(format!("HAR_RV selected but realized volatility missing on {missing} rows"));
        }
    }

    if variables.vol_model.is_garch() && facts.model_failures > 0 {
        out.push(format!(
            "{} forecast unavailable on {} rows with a full drift window",
            variables.vol_model, facts.model_failures
        ));
    }

    if variables.vol_window_days.is_some() && !variables.vol_model.is_garch() {
        out.push(format!("vol_window_days ignored for {}", variables.vol_model));
    }

    for w in &out {
        tracing::warn!(warning = %w, "diagnostics");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::RowReason;
    use chrono::NaiveDate;

    fn vars(model: VolModel) -> Variables {
        Variables {
            window_days: 20,
            horizon_h_days: 1,
            pi_coverage: 0.95,
            drift_shrinkage_lambda: 1.0,
            vol_model: model,
            variance_targeting: false,
            innovations_df: 5,
            vol_window_days: None,
            skip_earnings: false,
        }
    }

    fn input(day: u32) -> InputRow {
        InputRow {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: None,
            high: None,
            low: None,
            close: Some(100.0),
            adj_close: None,
            realized_vol: None,
            earnings_flag: false,
        }
    }

    fn facts() -> RunFacts {
        RunFacts { model: "GBM", critical_value: 1.96, model_failures: 0 }
    }

    #[test]
    fn test_coverage_and_reasons() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let mut a = ComputedRow::empty(d, RowReason::Ok);
        a.price = Some(1.0);
        a.breakout_direction = Some(BreakoutDirection::Up);
        let b = ComputedRow::empty(d, RowReason::InsufficientHistory);
        let mut c = ComputedRow::empty(d, RowReason::Ok);
        c.price = Some(2.0);
        c.breakout_direction = Some(BreakoutDirection::In);

        let diag = summarize(&vars(VolModel::Gbm), &[], &[a, b, c], facts());
        assert_eq!(diag.row_count, 3);
        assert_eq!(diag.field_coverage["price"], 2);
        assert_eq!(diag.field_coverage["garch_alpha"], 0);
        assert_eq!(diag.field_coverage["date"], 3);
        assert_eq!(diag.reason_counts["ok"], 2);
        assert_eq!(diag.reason_counts["insufficient_history"], 1);
        assert_eq!(diag.breakout_summary.scored, 2);
        assert_eq!(diag.breakout_summary.breakout_rate, Some(0.5));
        assert!((diag.breakout_summary.nominal_rate - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_sample_first_middle_last() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let rows: Vec<_> = (0..7).map(|_| ComputedRow::empty(d, RowReason::Ok)).collect();
        let diag = summarize(&vars(VolModel::Gbm), &[], &rows, facts());
        let idx: Vec<_> = diag.sample.iter().map(|s| s.index).collect();
        assert_eq!(idx, vec![0, 3, 6]);

        let diag = summarize(&vars(VolModel::Gbm), &[], &rows[..1], facts());
        assert_eq!(diag.sample.len(), 1);
        assert!(summarize(&vars(VolModel::Gbm), &[], &[], facts()).sample.is_empty());
    }

    #[test]
    fn test_warnings() {
        let inputs = [input(3), input(4), input(2)];
        let mut v = vars(VolModel::HarRv);
        v.vol_window_days = Some(30);
        let diag = summarize(&v, &inputs, &[], facts());
        assert_eq!(diag.warnings.len(), 3, "{:?}", diag.warnings);
        assert!(diag.warnings[0].contains("descending"));
        assert!(diag.warnings[1].contains("HAR_RV"));
        assert!(diag.warnings[2].contains("vol_window_days"));

        let f = RunFacts { model_failures: 4, ..facts() };
        let diag = summarize(&vars(VolModel::GarchNormal), &[input(4), input(3)], &[], f);
        assert_eq!(diag.warnings.len(), 1);
        assert!(diag.warnings[0].contains("4 rows"));
    }
}
