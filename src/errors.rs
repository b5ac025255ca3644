/// Domain-specific error types for the forecasting engine.
/// Only configuration problems are fatal to a run:
/// - Invalid variables abort before any row is processed
/// - Per-row data problems are recorded on the row, never raised
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid variables: {}", .0.join("; "))]
    InvalidVariables(Vec<String>),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Individual violations for an aggregated validation failure.
    pub fn violations(&self) -> &[String] {
        match self {
            EngineError::InvalidVariables(v) => v,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
