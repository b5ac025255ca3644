use crate::errors::{EngineError, EngineResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub data_dir: PathBuf,
    /// Upper bound on rows read back from the history store per request.
    pub history_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| EngineError::Config(format!("SERVER_PORT: {e}")))?;

        let history_limit = env_var_or("HISTORY_LIMIT", "5000")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("HISTORY_LIMIT: {e}")))?;
        if history_limit == 0 {
            return Err(EngineError::Config("HISTORY_LIMIT: must be positive".into()));
        }

        Ok(Self {
            server_port,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            history_limit,
        })
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
