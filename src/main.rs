use pi_forecast::config::AppConfig;
use pi_forecast::state::AppState;
use pi_forecast::{db, server};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Structured logging (line-buffered)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("pi_forecast starting");

    // 1. Config
    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    // 2. Price-history store
    let db = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database error: {e}");
            std::process::exit(1);
        }
    };

    // 3. HTTP server
    let port = cfg.server_port;
    let app_state = Arc::new(AppState::new(cfg, db));
    let app = server::router(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
