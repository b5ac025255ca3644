use crate::errors::{EngineError, EngineResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// Loosely keyed configuration bag as received from callers.
pub type RawConfigBag = serde_json::Map<String, Value>;

const DEFAULT_DRIFT_SHRINKAGE: f64 = 1.0;
const DEFAULT_INNOVATIONS_DF: u32 = 5;

/// Supported volatility models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VolModel {
    #[serde(rename = "GBM")]
    Gbm,
    #[serde(rename = "GARCH_NORMAL")]
    GarchNormal,
    #[serde(rename = "GARCH_T")]
    GarchT,
    #[serde(rename = "HAR_RV")]
    HarRv,
}

impl VolModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gbm => "GBM",
            Self::GarchNormal => "GARCH_NORMAL",
            Self::GarchT => "GARCH_T",
            Self::HarRv => "HAR_RV",
        }
    }

    #[inline]
    pub fn is_garch(&self) -> bool {
        matches!(self, Self::GarchNormal | Self::GarchT)
    }

    /// Case/punctuation-insensitive parse with a few common aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' || c == '.' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match key.as_str() {
            "GBM" => Some(Self::Gbm),
            "GARCH_NORMAL" | "GARCH" | "GARCH_N" => Some(Self::GarchNormal),
            "GARCH_T" | "GARCH_STUDENT_T" | "GARCH_STUDENT" => Some(Self::GarchT),
            "HAR_RV" | "HAR" | "HARRV" => Some(Self::HarRv),
            _ => None,
        }
    }
}

impl std::fmt::Display for VolModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Variables {
    pub window_days: usize,
    pub horizon_h_days: usize,
    pub pi_coverage: f64,
    pub drift_shrinkage_lambda: f64,
    pub vol_model: VolModel,
    pub variance_targeting: bool,
    pub innovations_df: u32,
    pub vol_window_days: Option<usize>,
    pub skip_earnings: bool,
}

impl Variables {
    /// Residual window used for GARCH fitting.
    #[inline]
    pub fn garch_window(&self) -> usize {
        self.vol_window_days.unwrap_or(self.window_days)
    }
}

/// Canonical form of a configuration key: trimmed, lowercase, separators
/// folded to single underscores.
pub fn canonical_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = match c {
            ' ' | '-' | '.' | '\t' => '_',
            c => c.to_ascii_lowercase(),
        };
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('_') {
        out.pop();
    }
    resolve_alias(&out).to_string()
}

fn resolve_alias(key: &str) -> &str {
    match key {
        "window" | "windowdays" => "window_days",
        "horizon" | "horizon_days" | "horizon_h" => "horizon_h_days",
        "coverage" | "pi" | "picoverage" => "pi_coverage",
        "lambda" | "drift_lambda" | "drift_shrinkage" => "drift_shrinkage_lambda",
        "model" | "volmodel" => "vol_model",
        "df" | "nu" | "student_t_df" => "innovations_df",
        "vol_window" => "vol_window_days",
        "targeting" => "variance_targeting",
        other => other,
    }
}

/// Turn a loosely keyed bag into validated `Variables`.
///
/// Every violation is collected; the error lists all of them at once.
pub fn normalize(bag: &RawConfigBag) -> EngineResult<Variables> {
    let mut violations: Vec<String> = Vec::new();
    let mut canon: BTreeMap<String, &Value> = BTreeMap::new();

    for (raw_key, value) in bag {
        if value.is_null() || value.as_str().is_some_and(|s| s.trim().is_empty()) {
            continue;
        }
        let key = canonical_key(raw_key);
        if let Some(prev) = canon.get(&key) {
            if !same_setting(prev, value) {
                violations.push(format!("{key}: conflicting values supplied ({prev} vs {value})"));
            }
            continue;
        }
        canon.insert(key, value);
    }

    let window_days = take_int(&canon, "window_days", true, &mut violations);
    let horizon = take_int(&canon, "horizon_h_days", true, &mut violations);
    let coverage = take_float(&canon, "pi_coverage", true, &mut violations);
    let lambda = take_float(&canon, "drift_shrinkage_lambda", false, &mut violations);
    let targeting = take_bool(&canon, "variance_targeting", &mut violations);
    let df = take_int(&canon, "innovations_df", false, &mut violations);
    let vol_window = take_int(&canon, "vol_window_days", false, &mut violations);
    let skip_earnings = take_bool(&canon, "skip_earnings", &mut violations);

    let vol_model = match canon.get("vol_model") {
        None => {
            violations.push("missing required variable: vol_model".into());
            None
        }
        Some(v) => {
            let parsed = v.as_str().and_then(VolModel::parse);
            if parsed.is_none() {
                violations.push(format!(
                    "vol_model must be one of GBM, GARCH_NORMAL, GARCH_T, HAR_RV (got {v})"
                ));
            }
            parsed
        }
    };

    if let Some(w) = window_days {
        if w <= 1 {
            violations.push(format!("window_days must be > 1 (got {w})"));
        }
    }
    if let Some(h) = horizon {
        if h < 1 {
            violations.push(format!("horizon_h_days must be >= 1 (got {h})"));
        }
    }
    if let Some(p) = coverage {
        if !(p > 0.0 && p < 1.0) {
            violations.push(format!("pi_coverage must be strictly inside (0, 1) (got {p})"));
        }
    }
    if let Some(l) = lambda {
        if !l.is_finite() {
            violations.push(format!("drift_shrinkage_lambda must be finite (got {l})"));
        }
    }
    if let Some(nu) = df {
        if nu <= 2 {
            violations.push(format!("innovations_df must be > 2 (got {nu})"));
        }
    } else if vol_model == Some(VolModel::GarchT) {
        violations.push("innovations_df is required for GARCH_T".into());
    }
    if let Some(vw) = vol_window {
        if vw <= 1 {
            violations.push(format!("vol_window_days must be > 1 (got {vw})"));
        }
    }

    // Range-checked values must also fit their target integer type.
    let window_days = window_days
        .filter(|w| *w > 1)
        .and_then(|w| narrow::<usize>("window_days", w, &mut violations));
    let horizon = horizon
        .filter(|h| *h >= 1)
        .and_then(|h| narrow::<usize>("horizon_h_days", h, &mut violations));
    let df = df
        .filter(|nu| *nu > 2)
        .and_then(|nu| narrow::<u32>("innovations_df", nu, &mut violations));
    let vol_window = vol_window
        .filter(|vw| *vw > 1)
        .and_then(|vw| narrow::<usize>("vol_window_days", vw, &mut violations));

    for key in canon.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::debug!(key = %key, "ignoring unknown variable");
        }
    }

    if !violations.is_empty() {
        tracing::warn!(count = violations.len(), "variable validation failed");
        return Err(EngineError::InvalidVariables(violations));
    }

    // All Options are Some here: any None above pushed a violation.
    let (Some(window_days), Some(horizon), Some(coverage), Some(vol_model)) =
        (window_days, horizon, coverage, vol_model)
    else {
        return Err(EngineError::InvalidVariables(vec!["incomplete variables".into()]));
    };

    let vars = Variables {
        window_days,
        horizon_h_days: horizon,
        pi_coverage: coverage,
        drift_shrinkage_lambda: lambda.unwrap_or(DEFAULT_DRIFT_SHRINKAGE),
        vol_model,
        variance_targeting: targeting.unwrap_or(false),
        innovations_df: df.unwrap_or(DEFAULT_INNOVATIONS_DF),
        vol_window_days: vol_window,
        skip_earnings: skip_earnings.unwrap_or(false),
    };

    tracing::debug!(
        model = %vars.vol_model,
        window = vars.window_days,
        horizon = vars.horizon_h_days,
        coverage = vars.pi_coverage,
        "variables validated"
    );
    Ok(vars)
}

const KNOWN_KEYS: [&str; 9] = [
    "window_days",
    "horizon_h_days",
    "pi_coverage",
    "drift_shrinkage_lambda",
    "vol_model",
    "variance_targeting",
    "innovations_df",
    "vol_window_days",
    "skip_earnings",
];

fn take_int(
    canon: &BTreeMap<String, &Value>,
    key: &str,
    required: bool,
    violations: &mut Vec<String>,
) -> Option<i64> {
    let Some(v) = canon.get(key) else {
        if required {
            violations.push(format!("missing required variable: {key}"));
        }
        return None;
    };
    let parsed = match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 1e15).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 1e15)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };
    if parsed.is_none() {
        violations.push(format!("{key}: expected an integer (got {v})"));
    }
    parsed
}

fn take_float(
    canon: &BTreeMap<String, &Value>,
    key: &str,
    required: bool,
    violations: &mut Vec<String>,
) -> Option<f64> {
    let Some(v) = canon.get(key) else {
        if required {
            violations.push(format!("missing required variable: {key}"));
        }
        return None;
    };
    let parsed = as_number(v);
    if parsed.is_none() {
        violations.push(format!("{key}: expected a number (got {v})"));
    }
    parsed
}

fn take_bool(canon: &BTreeMap<String, &Value>, key: &str, violations: &mut Vec<String>) -> Option<bool> {
    let v = canon.get(key)?;
    let parsed = as_bool(v);
    if parsed.is_none() {
        violations.push(format!("{key}: expected a boolean (got {v})"));
    }
    parsed
}

fn narrow<T: TryFrom<i64>>(key: &str, v: i64, violations: &mut Vec<String>) -> Option<T> {
    let out = T::try_from(v).ok();
    if out.is_none() {
        violations.push(format!("{key} out of range (got {v})"));
    }
    out
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" | "t" => Some(true),
            "false" | "no" | "n" | "off" | "0" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Two raw values for the same key agree once coerced.
fn same_setting(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (as_bool(a), as_bool(b)) {
        return x == y;
    }
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => match (VolModel::parse(x), VolModel::parse(y)) {
            (Some(mx), Some(my)) => mx == my,
            _ => x.trim().eq_ignore_ascii_case(y.trim()),
        },
        _ => false,
    }
}
