use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{
    BenchmarkEligibility, ChangeType, FetchedFund, Fund, FundId, SignificantMarketChange,
    WatchlistEntry,
};

pub const LAST_FETCH_DATE_KEY: &str = "last_fetch_date";

pub struct Database {
    pub conn: Connection,
}

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// Runs all SQLite operations on a dedicated background thread via
/// `tokio_rusqlite`, keeping the Tokio runtime cooperative. Clone is
/// cheap (shared mpsc sender to the background thread).
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, set PRAGMAs (WAL, foreign keys, busy_timeout),
    /// and create the schema, all on the background thread.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;

        // Schema creation needs a write lock. The web process and a cron-driven refresh can
        // open the same file at once, so retry with backoff instead of failing hard.
        let mut backoff = std::time::Duration::from_secs(1);
        let max_backoff = std::time::Duration::from_secs(30);
        let max_total_wait = std::time::Duration::from_secs(5 * 60);
        let start = std::time::Instant::now();

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(std::time::Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
                    conn.execute_batch(SCHEMA)?;
                    conn.busy_timeout(std::time::Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    let is_locked = matches!(
                        err,
                        rusqlite::Error::SqliteFailure(
                            rusqlite::ffi::Error {
                                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                                ..
                            },
                            _,
                        )
                    );
                    if !is_locked {
                        return Err(
                            anyhow::Error::from(err).context("AsyncDb::open: schema setup failed")
                        );
                    }

                    if start.elapsed() >= max_total_wait {
                        return Err(anyhow::Error::from(err).context(
                            "AsyncDb::open: schema setup failed (database stayed locked too long)",
                        ));
                    }

                    tracing::warn!(
                        wait_for = ?backoff,
                        "AsyncDb::open: database is locked; retrying schema setup"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(anyhow::anyhow!("AsyncDb::open: {other}")),
            }
        }

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return the result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records Prometheus metrics for DB latency and errors.
    ///
    /// This measures the full wall-clock time of the operation, including queueing
    /// on the dedicated SQLite thread.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        match &res {
            Ok(_) => {
                metrics::histogram!(
                    "fundtrend_db_query_latency_ms",
                    "op" => op,
                    "status" => "ok"
                )
                .record(ms);
            }
            Err(_) => {
                metrics::histogram!(
                    "fundtrend_db_query_latency_ms",
                    "op" => op,
                    "status" => "err"
                )
                .record(ms);
                metrics::counter!("fundtrend_db_query_errors_total", "op" => op).increment(1);
            }
        }

        res
    }
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS funds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scheme_code INTEGER UNIQUE,
    fund_name TEXT NOT NULL,
    fund_house TEXT NOT NULL DEFAULT 'Unknown',
    category TEXT NOT NULL DEFAULT 'Unknown',
    focus TEXT,                                   -- optional theme tag (Banking, Pharma, ...)
    benchmark_eligible INTEGER NOT NULL DEFAULT 1, -- 0 = may not define the per-date max
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS fund_returns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fund_id INTEGER NOT NULL REFERENCES funds(id) ON DELETE CASCADE,
    report_date TEXT NOT NULL,                    -- YYYY-MM-DD
    roi_1y REAL,
    roi_2y REAL,
    roi_3y REAL,
    source TEXT NOT NULL DEFAULT 'fetch',
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(fund_id, report_date)
);

CREATE INDEX IF NOT EXISTS idx_fund_returns_date ON fund_returns(report_date);

CREATE TABLE IF NOT EXISTS watchlist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fund_id INTEGER NOT NULL UNIQUE REFERENCES funds(id) ON DELETE CASCADE,
    added_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS market_significant_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    index_name TEXT NOT NULL,
    change_date TEXT NOT NULL,
    previous_close REAL NOT NULL,
    current_close REAL NOT NULL,
    change_percent REAL NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('up', 'down')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(index_name, change_date)
);

CREATE TABLE IF NOT EXISTS app_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS job_status (
    job_name TEXT PRIMARY KEY,
    status TEXT NOT NULL,             -- running, idle, failed
    last_run_at TEXT,
    duration_ms INTEGER,
    last_error TEXT,
    metadata TEXT,                    -- JSON
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

// ==================== FUNDS ====================

/// Insert or refresh a fund keyed by scheme code. The focus tag is left untouched.
pub fn upsert_fund(
    conn: &Connection,
    fund: &FetchedFund,
    ineligible_categories: &[String],
) -> rusqlite::Result<FundId> {
    let eligibility = BenchmarkEligibility::classify(&fund.category, ineligible_categories);
    conn.query_row(
        "INSERT INTO funds (scheme_code, fund_name, fund_house, category, benchmark_eligible)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(scheme_code) DO UPDATE SET
            fund_name = excluded.fund_name,
            fund_house = excluded.fund_house,
            category = excluded.category,
            benchmark_eligible = excluded.benchmark_eligible,
            updated_at = datetime('now')
         RETURNING id",
        params![
            fund.scheme_code,
            fund.fund_name,
            fund.fund_house,
            fund.category,
            eligibility.as_db(),
        ],
        |row| row.get(0),
    )
}

pub fn set_fund_focus(conn: &Connection, fund_id: FundId, focus: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE funds SET focus = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![fund_id, focus],
    )?;
    Ok(changed > 0)
}

fn fund_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fund> {
    Ok(Fund {
        id: row.get(0)?,
        scheme_code: row.get(1)?,
        fund_name: row.get(2)?,
        fund_house: row.get(3)?,
        category: row.get(4)?,
        focus: row.get(5)?,
        eligibility: BenchmarkEligibility::from_db(row.get(6)?),
    })
}

const FUND_COLUMNS: &str =
    "id, scheme_code, fund_name, fund_house, category, focus, benchmark_eligible";

pub fn list_funds(conn: &Connection) -> rusqlite::Result<Vec<Fund>> {
    let mut stmt = conn.prepare(&format!("SELECT {FUND_COLUMNS} FROM funds ORDER BY id"))?;
    let rows = stmt
        .query_map([], fund_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn funds_by_ids(conn: &Connection, ids: &[FundId]) -> rusqlite::Result<Vec<Fund>> {
    let ids_json = ids_to_json(ids);
    let mut stmt = conn.prepare(&format!(
        "SELECT {FUND_COLUMNS} FROM funds
         WHERE id IN (SELECT value FROM json_each(?1))
         ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(params![ids_json], fund_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn fund_by_id(conn: &Connection, id: FundId) -> rusqlite::Result<Option<Fund>> {
    conn.query_row(
        &format!("SELECT {FUND_COLUMNS} FROM funds WHERE id = ?1"),
        params![id],
        fund_from_row,
    )
    .optional()
}

pub fn count_funds(conn: &Connection) -> rusqlite::Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM funds", [], |row| row.get(0))?;
    Ok(usize::try_from(n).unwrap_or(0))
}

// ==================== RETURNS ====================

/// Keyed upsert on (fund_id, report_date). A single statement, so each row commits atomically.
pub fn upsert_return(
    conn: &Connection,
    fund_id: FundId,
    report_date: NaiveDate,
    fund: &FetchedFund,
    source: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO fund_returns (fund_id, report_date, roi_1y, roi_2y, roi_3y, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(fund_id, report_date) DO UPDATE SET
            roi_1y = excluded.roi_1y,
            roi_2y = excluded.roi_2y,
            roi_3y = excluded.roi_3y,
            source = excluded.source,
            fetched_at = datetime('now')",
        params![
            fund_id,
            report_date,
            fund.roi_1y,
            fund.roi_2y,
            fund.roi_3y,
            source
        ],
    )
}

pub fn latest_report_date(conn: &Connection) -> rusqlite::Result<Option<NaiveDate>> {
    conn.query_row("SELECT MAX(report_date) FROM fund_returns", [], |row| {
        row.get(0)
    })
}

/// Distinct report dates that have at least one row for any of `fund_ids`.
pub fn report_dates_for_funds(
    conn: &Connection,
    fund_ids: &[FundId],
) -> rusqlite::Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT report_date FROM fund_returns
         WHERE fund_id IN (SELECT value FROM json_each(?1))
         ORDER BY report_date",
    )?;
    let rows = stmt
        .query_map(params![ids_to_json(fund_ids)], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_returns_on(conn: &Connection, report_date: NaiveDate) -> rusqlite::Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fund_returns WHERE report_date = ?1",
        params![report_date],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(n).unwrap_or(0))
}

// ==================== WATCHLIST ====================

/// Returns true when the fund was newly pinned.
pub fn add_to_watchlist(conn: &Connection, fund_id: FundId) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO watchlist (fund_id) VALUES (?1)",
        params![fund_id],
    )?;
    Ok(changed > 0)
}

/// Returns true when a pinned fund was removed.
pub fn remove_from_watchlist(conn: &Connection, fund_id: FundId) -> rusqlite::Result<bool> {
    let changed = conn.execute("DELETE FROM watchlist WHERE fund_id = ?1", params![fund_id])?;
    Ok(changed > 0)
}

pub fn watchlist(conn: &Connection) -> rusqlite::Result<Vec<WatchlistEntry>> {
    let mut stmt = conn.prepare(
        "SELECT w.fund_id, f.fund_name, w.added_at
         FROM watchlist w
         JOIN funds f ON f.id = w.fund_id
         ORDER BY w.added_at DESC, w.fund_id ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(WatchlistEntry {
                fund_id: row.get(0)?,
                fund_name: row.get(1)?,
                added_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn watchlist_fund_ids(conn: &Connection) -> rusqlite::Result<Vec<FundId>> {
    let mut stmt = conn.prepare("SELECT fund_id FROM watchlist ORDER BY fund_id")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ==================== MARKET CHANGES ====================

pub fn significant_change_exists(
    conn: &Connection,
    index_name: &str,
    change_date: NaiveDate,
) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM market_significant_changes WHERE index_name = ?1 AND change_date = ?2",
        params![index_name, change_date],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

pub fn upsert_significant_change(
    conn: &Connection,
    change: &SignificantMarketChange,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO market_significant_changes
            (index_name, change_date, previous_close, current_close, change_percent, change_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(index_name, change_date) DO UPDATE SET
            previous_close = excluded.previous_close,
            current_close = excluded.current_close,
            change_percent = excluded.change_percent,
            change_type = excluded.change_type",
        params![
            change.index_name,
            change.change_date,
            change.previous_close,
            change.current_close,
            change.change_percent,
            change.change_type.as_str(),
        ],
    )
}

/// Recorded change dates with no stored returns at all, newest first.
/// `since` keeps only dates on or after it.
pub fn significant_dates_without_returns(
    conn: &Connection,
    index_name: &str,
    since: Option<NaiveDate>,
) -> rusqlite::Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT m.change_date
         FROM market_significant_changes m
         WHERE m.index_name = ?1
           AND (?2 IS NULL OR m.change_date >= ?2)
           AND NOT EXISTS (SELECT 1 FROM fund_returns r WHERE r.report_date = m.change_date)
         ORDER BY m.change_date DESC",
    )?;
    let rows = stmt
        .query_map(params![index_name, since], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Recorded changes for an index, newest first.
pub fn significant_changes(
    conn: &Connection,
    index_name: &str,
) -> rusqlite::Result<Vec<SignificantMarketChange>> {
    let mut stmt = conn.prepare(
        "SELECT index_name, change_date, previous_close, current_close, change_percent, change_type
         FROM market_significant_changes
         WHERE index_name = ?1
         ORDER BY change_date DESC",
    )?;
    let rows = stmt
        .query_map(params![index_name], |row| {
            let change_percent: f64 = row.get(4)?;
            let change_type: String = row.get(5)?;
            Ok(SignificantMarketChange {
                index_name: row.get(0)?,
                change_date: row.get(1)?,
                previous_close: row.get(2)?,
                current_close: row.get(3)?,
                change_percent,
                change_type: ChangeType::parse(&change_type)
                    .unwrap_or_else(|| ChangeType::from_percent(change_percent)),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ==================== APP CONFIG ====================

pub fn get_config_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config_value(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

/// Last date a fetch completed, as recorded by the refresh job.
pub fn last_fetch_date(conn: &Connection) -> rusqlite::Result<Option<NaiveDate>> {
    Ok(get_config_value(conn, LAST_FETCH_DATE_KEY)?
        .and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok()))
}

pub fn ids_to_json(ids: &[FundId]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(scheme_code: i64, name: &str, category: &str, roi_3y: Option<f64>) -> FetchedFund {
        FetchedFund {
            scheme_code,
            fund_name: name.to_string(),
            fund_house: "House".to_string(),
            category: category.to_string(),
            roi_1y: None,
            roi_2y: None,
            roi_3y,
        }
    }

    fn open() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        db
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_run_migrations_is_idempotent() {
        let db = open();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn test_upsert_fund_keeps_id_and_classifies_category() {
        let db = open();
        let ineligible = vec!["Other Scheme - FoF Overseas".to_string()];
        let id1 = upsert_fund(&db.conn, &fetched(1, "A", "Equity", None), &ineligible).unwrap();
        let id2 = upsert_fund(
            &db.conn,
            &fetched(1, "A renamed", "Other Scheme - FoF Overseas", None),
            &ineligible,
        )
        .unwrap();
        assert_eq!(id1, id2);

        let fund = fund_by_id(&db.conn, id1).unwrap().unwrap();
        assert_eq!(fund.fund_name, "A renamed");
        assert_eq!(fund.eligibility, BenchmarkEligibility::Ineligible);
        assert_eq!(count_funds(&db.conn).unwrap(), 1);
    }

    #[test]
    fn test_upsert_return_is_idempotent() {
        let db = open();
        let f = fetched(7, "Fund", "Equity", Some(12.0));
        let id = upsert_fund(&db.conn, &f, &[]).unwrap();
        upsert_return(&db.conn, id, d("2026-01-14"), &f, "fetch").unwrap();
        let f2 = fetched(7, "Fund", "Equity", Some(13.5));
        upsert_return(&db.conn, id, d("2026-01-14"), &f2, "fetch").unwrap();

        assert_eq!(count_returns_on(&db.conn, d("2026-01-14")).unwrap(), 1);
        let roi: f64 = db
            .conn
            .query_row("SELECT roi_3y FROM fund_returns", [], |row| row.get(0))
            .unwrap();
        assert!((roi - 13.5).abs() < 1e-9);
        assert_eq!(latest_report_date(&db.conn).unwrap(), Some(d("2026-01-14")));
    }

    #[test]
    fn test_latest_report_date_empty_is_none() {
        let db = open();
        assert_eq!(latest_report_date(&db.conn).unwrap(), None);
    }

    #[test]
    fn test_watchlist_add_remove() {
        let db = open();
        let id = upsert_fund(&db.conn, &fetched(3, "Pinned", "Equity", None), &[]).unwrap();
        assert!(add_to_watchlist(&db.conn, id).unwrap());
        assert!(!add_to_watchlist(&db.conn, id).unwrap());
        assert_eq!(watchlist_fund_ids(&db.conn).unwrap(), vec![id]);
        assert_eq!(watchlist(&db.conn).unwrap()[0].fund_name, "Pinned");
        assert!(remove_from_watchlist(&db.conn, id).unwrap());
        assert!(watchlist_fund_ids(&db.conn).unwrap().is_empty());
    }

    #[test]
    fn test_significant_change_upsert_is_unique_per_index_and_date() {
        let db = open();
        let change = SignificantMarketChange {
            index_name: "SENSEX".to_string(),
            change_date: d("2026-01-14"),
            previous_close: 80_000.0,
            current_close: 80_800.0,
            change_percent: 1.0,
            change_type: ChangeType::Up,
        };
        upsert_significant_change(&db.conn, &change).unwrap();
        upsert_significant_change(&db.conn, &change).unwrap();
        assert!(significant_change_exists(&db.conn, "SENSEX", d("2026-01-14")).unwrap());
        assert!(!significant_change_exists(&db.conn, "NIFTY50", d("2026-01-14")).unwrap());
        let all = significant_changes(&db.conn, "SENSEX").unwrap();
        assert_eq!(all, vec![change]);
    }

    #[test]
    fn test_app_config_round_trip() {
        let db = open();
        assert_eq!(get_config_value(&db.conn, LAST_FETCH_DATE_KEY).unwrap(), None);
        set_config_value(&db.conn, LAST_FETCH_DATE_KEY, "2026-01-14").unwrap();
        set_config_value(&db.conn, LAST_FETCH_DATE_KEY, "2026-01-15").unwrap();
        assert_eq!(
            get_config_value(&db.conn, LAST_FETCH_DATE_KEY).unwrap(),
            Some("2026-01-15".to_string())
        );
        assert_eq!(last_fetch_date(&db.conn).unwrap(), Some(d("2026-01-15")));
    }

    #[test]
    fn test_report_dates_for_funds_filters_by_fund() {
        let db = open();
        let a = fetched(1, "A", "Equity", Some(1.0));
        let b = fetched(2, "B", "Equity", Some(2.0));
        let ida = upsert_fund(&db.conn, &a, &[]).unwrap();
        let idb = upsert_fund(&db.conn, &b, &[]).unwrap();
        upsert_return(&db.conn, ida, d("2026-01-01"), &a, "fetch").unwrap();
        upsert_return(&db.conn, idb, d("2026-01-02"), &b, "fetch").unwrap();
        assert_eq!(
            report_dates_for_funds(&db.conn, &[ida]).unwrap(),
            vec![d("2026-01-01")]
        );
        assert_eq!(report_dates_for_funds(&db.conn, &[ida, idb]).unwrap().len(), 2);
    }

    #[test]
    fn test_significant_dates_without_returns_skips_filled_dates() {
        let db = open();
        for date in ["2025-06-02", "2025-12-01", "2026-01-05"] {
            let change = SignificantMarketChange {
                index_name: "SENSEX".to_string(),
                change_date: d(date),
                previous_close: 100.0,
                current_close: 99.0,
                change_percent: -1.0,
                change_type: ChangeType::Down,
            };
            upsert_significant_change(&db.conn, &change).unwrap();
        }
        let a = fetched(1, "A", "Equity", Some(1.0));
        let id = upsert_fund(&db.conn, &a, &[]).unwrap();
        upsert_return(&db.conn, id, d("2025-12-01"), &a, "fetch").unwrap();

        assert_eq!(
            significant_dates_without_returns(&db.conn, "SENSEX", None).unwrap(),
            vec![d("2026-01-05"), d("2025-06-02")]
        );
        assert_eq!(
            significant_dates_without_returns(&db.conn, "SENSEX", Some(d("2025-07-01"))).unwrap(),
            vec![d("2026-01-05")]
        );
        assert!(significant_dates_without_returns(&db.conn, "NIFTY50", None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_set_fund_focus_survives_upsert() {
        let db = open();
        let a = fetched(1, "A", "Equity", Some(1.0));
        let id = upsert_fund(&db.conn, &a, &[]).unwrap();
        assert!(set_fund_focus(&db.conn, id, "Banking").unwrap());
        assert!(!set_fund_focus(&db.conn, 999, "Banking").unwrap());
        upsert_fund(&db.conn, &a, &[]).unwrap();
        let fund = fund_by_id(&db.conn, id).unwrap().unwrap();
        assert_eq!(fund.focus.as_deref(), Some("Banking"));
    }
}
