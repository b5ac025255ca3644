use crate::config::AppConfig;
use crate::db::DbPool;
use portable_atomic::{AtomicU64, Ordering};

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub computations_run: AtomicU64,
    pub rows_processed: AtomicU64,
    pub rows_scored: AtomicU64,
    pub config_errors: AtomicU64,
    pub history_writes: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            computations_run: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            config_errors: AtomicU64::new(0),
            history_writes: AtomicU64::new(0),
        }
    }

    pub fn record_compute(&self, rows: usize, scored: usize) {
        self.computations_run.fetch_add(1, Ordering::Relaxed);
        self.rows_processed.fetch_add(rows as u64, Ordering::Relaxed);
        self.rows_scored.fetch_add(scored as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "computations_run": self.computations_run.load(Ordering::Relaxed),
            "rows_processed": self.rows_processed.load(Ordering::Relaxed),
            "rows_scored": self.rows_scored.load(Ordering::Relaxed),
            "config_errors": self.config_errors.load(Ordering::Relaxed),
            "history_writes": self.history_writes.load(Ordering::Relaxed),
        })
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        Self {
            config,
            db,
            counters: PerfCounters::new(),
        }
    }
}
