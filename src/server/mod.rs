pub mod routes;

use crate::state::AppState;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/counters", get(routes::get_counters))
        .route("/api/compute", post(routes::post_compute))
        .route("/api/history", get(routes::get_symbols))
        .route(
            "/api/history/{symbol}",
            get(routes::get_history).put(routes::put_history),
        )
        .route("/api/history/{symbol}/intervals", post(routes::post_history_intervals))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
