use crate::db;
use crate::engine::{self, ComputeOutput};
use crate::errors::EngineError;
use crate::rows::InputRow;
use crate::state::AppState;
use crate::variables::RawConfigBag;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use portable_atomic::Ordering::Relaxed;
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct ComputeRequest {
    pub rows: Vec<InputRow>,
    pub variables: RawConfigBag,
}

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(serde::Deserialize)]
pub struct HistoryUpload {
    pub rows: Vec<InputRow>,
}

#[derive(serde::Deserialize)]
pub struct IntervalsRequest {
    pub variables: RawConfigBag,
    pub limit: Option<usize>,
}

/// JSON error body; validation problems map to 400 with every violation listed.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            EngineError::InvalidVariables(_) | EngineError::Parse(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "violations": self.0.violations(),
        });
        (status, Json(body)).into_response()
    }
}

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.counters.snapshot())
}

/// POST /api/compute -- run the engine on posted rows
pub async fn post_compute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ComputeRequest>,
) -> Result<Json<ComputeOutput>, ApiError> {
    let out = run_compute(&state, req.rows, req.variables).await?;
    Ok(Json(out))
}

/// GET /api/history -- stored symbols with row counts and date range
pub async fn get_symbols(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let symbols = db::list_symbols(&state.db)?;
    Ok(Json(serde_json::json!({ "symbols": symbols })))
}

/// GET /api/history/{symbol} -- stored rows, newest-first
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = clamp_limit(params.limit, state.config.history_limit);
    let rows = db::load_history(&state.db, &symbol, limit)?;
    Ok(Json(serde_json::json!({ "symbol": symbol, "rows": rows })))
}

/// PUT /api/history/{symbol} -- upsert rows by date
pub async fn put_history(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(req): Json<HistoryUpload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upserted = db::upsert_rows(&state.db, &symbol, &req.rows)?;
    state.counters.history_writes.fetch_add(upserted as u64, Relaxed);
    tracing::info!(symbol = %symbol, upserted, "history stored");
    Ok(Json(serde_json::json!({ "symbol": symbol, "upserted": upserted })))
}

/// POST /api/history/{symbol}/intervals -- run the engine over stored history
pub async fn post_history_intervals(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(req): Json<IntervalsRequest>,
) -> Result<Json<ComputeOutput>, ApiError> {
    let limit = clamp_limit(req.limit, state.config.history_limit);
    let rows = db::load_history(&state.db, &symbol, limit)?;
    let out = run_compute(&state, rows, req.variables).await?;
    Ok(Json(out))
}

fn clamp_limit(requested: Option<usize>, max: usize) -> usize {
    requested.unwrap_or(max).clamp(1, max)
}

/// CPU-bound; runs off the async workers.
async fn run_compute(
    state: &AppState,
    rows: Vec<InputRow>,
    variables: RawConfigBag,
) -> Result<ComputeOutput, EngineError> {
    let result = tokio::task::spawn_blocking(move || engine::compute(&rows, &variables))
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?;

    match result {
        Ok(out) => {
            state
                .counters
                .record_compute(out.rows.len(), out.diagnostics.breakout_summary.scored);
            Ok(out)
        }
        Err(e) => {
            if matches!(e, EngineError::InvalidVariables(_)) {
                state.counters.config_errors.fetch_add(1, Relaxed);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::server::router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_state() -> Arc<AppState> {
        let config = AppConfig {
            server_port: 0,
            data_dir: std::path::PathBuf::from("unused"),
            history_limit: 500,
        };
        Arc::new(AppState::new(config, db::init_memory_db().unwrap()))
    }

    fn rows_json(n: usize) -> serde_json::Value {
        // newest-first, deterministic zig-zag prices
        let rows: Vec<_> = (0..n)
            .map(|k| {
                let t = n - 1 - k;
                let price = 100.0 * (0.001 * t as f64 + 0.01 * ((t as f64) * 1.7).sin()).exp();
                let date = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(t as i64);
                serde_json::json!({ "date": date, "adj_close": price, "realized_vol": 0.01 })
            })
            .collect();
        serde_json::Value::Array(rows)
    }

    async fn send(state: Arc<AppState>, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(b) => Body::from(b.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app_state(), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_compute_returns_rows_and_diagnostics() {
        let state = app_state();
        let body = serde_json::json!({
            "rows": rows_json(40),
            "variables": { "Window Days": "20", "horizon": 1, "PI-Coverage": 0.95, "model": "gbm" },
        });
        let (status, out) = send(state.clone(), "POST", "/api/compute", Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{out}");
        assert_eq!(out["rows"].as_array().unwrap().len(), 40);
        assert_eq!(out["rows"][0]["diagnostics_reason"], "no_next_day");
        assert_eq!(out["rows"][1]["diagnostics_reason"], "ok");
        assert_eq!(out["diagnostics"]["variables"]["vol_model"], "GBM");
        assert_eq!(state.counters.computations_run.load(Relaxed), 1);
        assert_eq!(state.counters.rows_processed.load(Relaxed), 40);
    }

    #[tokio::test]
    async fn test_compute_invalid_variables_is_400() {
        let state = app_state();
        let body = serde_json::json!({
            "rows": rows_json(5),
            "variables": { "window_days": 1, "pi_coverage": 1.5 },
        });
        let (status, out) = send(state.clone(), "POST", "/api/compute", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(out["violations"].as_array().unwrap().len() >= 3, "{out}");
        assert_eq!(state.counters.config_errors.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn test_history_roundtrip_and_intervals() {
        let state = app_state();
        let (status, out) = send(
            state.clone(),
            "PUT",
            "/api/history/ACME",
            Some(serde_json::json!({ "rows": rows_json(30) })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["upserted"], 30);

        let (status, out) = send(state.clone(), "GET", "/api/history/ACME?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = out["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows[0]["date"].as_str().unwrap() > rows[1]["date"].as_str().unwrap());

        let (status, out) = send(state.clone(), "GET", "/api/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["symbols"][0]["symbol"], "ACME");

        let (status, out) = send(
            state.clone(),
            "POST",
            "/api/history/ACME/intervals",
            Some(serde_json::json!({
                "variables": { "window_days": 10, "horizon_h_days": 2, "pi_coverage": 0.9, "vol_model": "HAR_RV" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{out}");
        assert_eq!(out["rows"].as_array().unwrap().len(), 30);
        assert_eq!(out["rows"][1]["vol_source"], "har_passthrough");

        let (_, counters) = send(state, "GET", "/api/counters", None).await;
        assert_eq!(counters["history_writes"], 30);
        assert_eq!(counters["computations_run"], 1);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 500), 500);
        assert_eq!(clamp_limit(Some(10), 500), 10);
        assert_eq!(clamp_limit(Some(10_000), 500), 500);
        assert_eq!(clamp_limit(Some(0), 500), 1);
    }
}
