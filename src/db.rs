use crate::errors::{EngineError, EngineResult};
use crate::rows::InputRow;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("pi_forecast.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-64000;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Schema-initialized in-memory store (tests and throwaway runs).
pub fn init_memory_db() -> EngineResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Insert or replace rows for `symbol`, keyed by date. Returns rows written.
pub fn upsert_rows(db: &DbPool, symbol: &str, rows: &[InputRow]) -> EngineResult<usize> {
    let mut conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let tx = conn.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO price_history (symbol, date, open, high, low, close, adj_close, realized_vol, earnings_flag, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
             ON CONFLICT(symbol, date) DO UPDATE SET
                open = excluded.open, high = excluded.high, low = excluded.low,
                close = excluded.close, adj_close = excluded.adj_close,
                realized_vol = excluded.realized_vol, earnings_flag = excluded.earnings_flag,
                updated_at = excluded.updated_at",
        )?;
        for r in rows {
            written += stmt.execute(rusqlite::params![
                symbol,
                r.date.format("%Y-%m-%d").to_string(),
                r.open,
                r.high,
                r.low,
                r.close,
                r.adj_close,
                r.realized_vol,
                r.earnings_flag,
            ])?;
        }
    }
    tx.commit()?;
    tracing::debug!(symbol, written, "price history upserted");
    Ok(written)
}

/// Most recent `limit` rows for `symbol`, newest-first.
///
/// Fails on the first row that cannot be decoded: dropping it would silently
/// join its neighbours into one multi-day return.
pub fn load_history(db: &DbPool, symbol: &str, limit: usize) -> EngineResult<Vec<InputRow>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT date, open, high, low, close, adj_close, realized_vol, earnings_flag
         FROM price_history WHERE symbol = ?1 ORDER BY date DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![symbol, limit as i64], |row| {
        let raw_date: String = row.get(0)?;
        let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(InputRow {
            date,
            open: row.get(1)?,
            high: row.get(2)?,
            low: row.get(3)?,
            close: row.get(4)?,
            adj_close: row.get(5)?,
            realized_vol: row.get(6)?,
            earnings_flag: row.get(7)?,
        })
    })?;

    let history = rows.collect::<Result<Vec<_>, _>>().map_err(|e| {
        tracing::warn!(symbol, error = %e, "undecodable stored row");
        EngineError::Database(format!("{symbol}: {e}"))
    })?;
    Ok(history)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub rows: i64,
    pub first_date: String,
    pub last_date: String,
}

pub fn list_symbols(db: &DbPool) -> EngineResult<Vec<SymbolSummary>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT symbol, COUNT(*), MIN(date), MAX(date) FROM price_history GROUP BY symbol ORDER BY symbol",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SymbolSummary {
            symbol: row.get(0)?,
            rows: row.get(1)?,
            first_date: row.get(2)?,
            last_date: row.get(3)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(day: u32, close: f64) -> InputRow {
        InputRow {
            date: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            open: Some(close - 1.0),
            high: Some(close + 1.0),
            low: Some(close - 2.0),
            close: Some(close),
            adj_close: None,
            realized_vol: Some(0.012),
            earnings_flag: day == 3,
        }
    }

    #[test]
    fn test_upsert_and_load_newest_first() {
        let db = init_memory_db().unwrap();
        let n = upsert_rows(&db, "ACME", &[row(1, 10.0), row(3, 12.0), row(2, 11.0)]).unwrap();
        assert_eq!(n, 3);

        let rows = load_history(&db, "ACME", 10).unwrap();
        let days: Vec<_> = rows.iter().map(|r| r.date.format("%d").to_string()).collect();
        assert_eq!(days, vec!["03", "02", "01"], "history must come back newest-first");
        assert!(rows[0].earnings_flag);
        assert_eq!(rows[0].realized_vol, Some(0.012));
        assert_eq!(rows[0].adj_close, None);
    }

    #[test]
    fn test_upsert_replaces_same_date() {
        let db = init_memory_db().unwrap();
        upsert_rows(&db, "ACME", &[row(1, 10.0)]).unwrap();
        upsert_rows(&db, "ACME", &[row(1, 99.0)]).unwrap();
        let rows = load_history(&db, "ACME", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, Some(99.0));
    }

    #[test]
    fn test_undecodable_row_fails_load() {
        let db = init_memory_db().unwrap();
        upsert_rows(&db, "ACME", &[row(1, 10.0), row(3, 12.0)]).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO price_history (symbol, date, close) VALUES ('ACME', '2024-02-02x', 11.0)",
                [],
            )
            .unwrap();
        }
        let err = load_history(&db, "ACME", 10).unwrap_err();
        assert!(matches!(err, EngineError::Database(_)), "{err}");
        assert!(err.to_string().contains("ACME"), "{err}");

        let db = init_memory_db().unwrap();
        upsert_rows(&db, "ACME", &[row(1, 10.0)]).unwrap();
        db.lock()
            .unwrap()
            .execute("UPDATE price_history SET close = 'abc' WHERE symbol = 'ACME'", [])
            .unwrap();
        assert!(load_history(&db, "ACME", 10).is_err(), "non-numeric price must not be dropped silently");
    }

    #[test]
    fn test_limit_and_symbol_isolation() {
        let db = init_memory_db().unwrap();
        upsert_rows(&db, "ACME", &[row(1, 10.0), row(2, 11.0), row(3, 12.0)]).unwrap();
        upsert_rows(&db, "OTHER", &[row(1, 5.0)]).unwrap();

        let rows = load_history(&db, "ACME", 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, Some(12.0));
        assert!(load_history(&db, "MISSING", 10).unwrap().is_empty());

        let symbols = list_symbols(&db).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].symbol, "ACME");
        assert_eq!(symbols[0].rows, 3);
        assert_eq!(symbols[0].first_date, "2024-02-01");
        assert_eq!(symbols[0].last_date, "2024-02-03");
    }
}
