use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::db::{self, AsyncDb, LAST_FETCH_DATE_KEY};
use common::types::FetchedFund;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetch for {date} timed out after {after:?}")]
    Timeout { date: NaiveDate, after: Duration },
    #[error("fetch for {date} failed: {reason}")]
    Failed { date: NaiveDate, reason: String },
}

impl FetchError {
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "failed",
        }
    }
}

/// External source of per-fund returns for one report date.
pub trait FundDataFetcher {
    fn fetch(
        &self,
        date: NaiveDate,
        refresh: bool,
    ) -> impl std::future::Future<Output = Result<Vec<FetchedFund>, FetchError>> + Send;
}

/// Runs an external program that prints one `FetchedFund` JSON object per stdout line.
///
/// `{date}` in any argument is replaced with the target date (`YYYY-MM-DD`); `--refresh`
/// is appended when a forced refresh is requested. The child is killed if the returned
/// future is dropped, which is how the orchestrator's timeout stops it.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
}

impl CommandFetcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(cfg: &common::config::Fetch) -> Self {
        Self::new(cfg.program.clone(), cfg.args.clone())
    }

    pub fn command_args(&self, date: NaiveDate, refresh: bool) -> Vec<String> {
        let date = date.format("%Y-%m-%d").to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{date}", &date))
            .collect();
        if refresh {
            args.push("--refresh".to_string());
        }
        args
    }
}

impl FundDataFetcher for CommandFetcher {
    async fn fetch(&self, date: NaiveDate, refresh: bool) -> Result<Vec<FetchedFund>, FetchError> {
        let failed = |reason: String| FetchError::Failed { date, reason };

        let output = tokio::process::Command::new(&self.program)
            .args(self.command_args(date, refresh))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!("spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(failed(format!("exit status {}: {tail}", output.status)));
        }

        parse_json_lines(&String::from_utf8_lossy(&output.stdout)).map_err(failed)
    }
}

/// Parse fetcher stdout. Lines that do not start with `{` are progress chatter and skipped.
pub fn parse_json_lines(stdout: &str) -> Result<Vec<FetchedFund>, String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str::<FetchedFund>(line).map_err(|e| format!("record {i}: {e}"))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub date: NaiveDate,
    pub funds_received: usize,
    pub rows_upserted: usize,
}

/// Fetch one date and upsert the result, the whole thing bounded by `timeout`.
///
/// Every fund and return row is its own single-statement write, so a timeout or failure
/// leaves already-written rows valid and the rest absent. No retry here.
pub struct FetchOrchestrator<F> {
    db: AsyncDb,
    fetcher: F,
    timeout: Duration,
    ineligible_categories: Arc<[String]>,
}

impl<F: FundDataFetcher + Sync> FetchOrchestrator<F> {
    pub fn new(db: AsyncDb, fetcher: F, timeout: Duration, ineligible_categories: &[String]) -> Self {
        Self {
            db,
            fetcher,
            timeout,
            ineligible_categories: ineligible_categories.into(),
        }
    }

    pub async fn run(&self, date: NaiveDate, refresh: bool) -> Result<FetchSummary, FetchError> {
        let start = std::time::Instant::now();
        let committed = AtomicUsize::new(0);

        let res = tokio::time::timeout(self.timeout, self.fetch_and_store(date, refresh, &committed))
            .await
            .unwrap_or(Err(FetchError::Timeout {
                date,
                after: self.timeout,
            }));

        let ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("fundtrend_fetch_latency_ms").record(ms);
        let rows = committed.load(Ordering::Relaxed);
        metrics::counter!("fundtrend_rows_upserted_total").increment(rows as u64);

        match &res {
            Ok(summary) => {
                metrics::counter!("fundtrend_fetch_runs_total", "status" => "ok").increment(1);
                tracing::info!(
                    %date,
                    funds = summary.funds_received,
                    rows = summary.rows_upserted,
                    "fetch complete"
                );
            }
            Err(e) => {
                metrics::counter!("fundtrend_fetch_runs_total", "status" => e.status_label())
                    .increment(1);
                tracing::error!(%date, committed_rows = rows, error = %e, "fetch did not complete");
            }
        }
        res
    }

    async fn fetch_and_store(
        &self,
        date: NaiveDate,
        refresh: bool,
        committed: &AtomicUsize,
    ) -> Result<FetchSummary, FetchError> {
        let funds = self.fetcher.fetch(date, refresh).await?;
        let funds_received = funds.len();

        for fund in funds {
            let ineligible = Arc::clone(&self.ineligible_categories);
            self.db
                .call_named("fetch.upsert_row", move |conn| {
                    let fund_id = db::upsert_fund(conn, &fund, &ineligible)?;
                    db::upsert_return(conn, fund_id, date, &fund, "fetch")?;
                    Ok(())
                })
                .await
                .map_err(|e| FetchError::Failed {
                    date,
                    reason: format!("store: {e:#}"),
                })?;
            committed.fetch_add(1, Ordering::Relaxed);
        }

        let value = date.format("%Y-%m-%d").to_string();
        self.db
            .call_named("fetch.set_last_fetch_date", move |conn| {
                db::set_config_value(conn, LAST_FETCH_DATE_KEY, &value)?;
                Ok(())
            })
            .await
            .map_err(|e| FetchError::Failed {
                date,
                reason: format!("store: {e:#}"),
            })?;

        Ok(FetchSummary {
            date,
            funds_received,
            rows_upserted: committed.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fund(scheme_code: i64, name: &str, roi_3y: Option<f64>) -> FetchedFund {
        FetchedFund {
            scheme_code,
            fund_name: name.to_string(),
            fund_house: "House".to_string(),
            category: "Equity Scheme - Large Cap Fund".to_string(),
            roi_1y: Some(1.0),
            roi_2y: Some(2.0),
            roi_3y,
        }
    }

    /// Returns a fixed batch, optionally after a delay.
    pub(crate) struct FakeFetcher {
        pub funds: Vec<FetchedFund>,
        pub delay: Option<Duration>,
        pub fail: bool,
    }

    impl FundDataFetcher for FakeFetcher {
        async fn fetch(
            &self,
            date: NaiveDate,
            _refresh: bool,
        ) -> Result<Vec<FetchedFund>, FetchError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(FetchError::Failed {
                    date,
                    reason: "provider down".to_string(),
                });
            }
            Ok(self.funds.clone())
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn snapshot(db: &AsyncDb) -> Vec<(i64, String, Option<f64>)> {
        db.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT fund_id, report_date, roi_3y FROM fund_returns ORDER BY fund_id, report_date",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_double_fetch_same_date_is_idempotent() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher {
            funds: vec![fund(1, "A", Some(12.0)), fund(2, "B", None), fund(3, "C", Some(8.0))],
            delay: None,
            fail: false,
        };
        let orch = FetchOrchestrator::new(db.clone(), fetcher, Duration::from_secs(5), &[]);

        let first = orch.run(d("2026-01-14"), false).await.unwrap();
        let after_first = snapshot(&db).await;
        let second = orch.run(d("2026-01-14"), true).await.unwrap();
        let after_second = snapshot(&db).await;

        assert_eq!(first.rows_upserted, 3);
        assert_eq!(second.rows_upserted, 3);
        assert_eq!(after_first.len(), 3);
        assert_eq!(after_first, after_second);

        let last = db
            .call(|conn| Ok(db::last_fetch_date(conn)?))
            .await
            .unwrap();
        assert_eq!(last, Some(d("2026-01-14")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_typed_error_and_writes_nothing() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher {
            funds: vec![fund(1, "A", Some(12.0))],
            delay: Some(Duration::from_secs(600)),
            fail: false,
        };
        let orch = FetchOrchestrator::new(db.clone(), fetcher, Duration::from_secs(300), &[]);

        let err = orch.run(d("2026-01-14"), false).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Timeout {
                date: d("2026-01-14"),
                after: Duration::from_secs(300)
            }
        );
        assert!(snapshot(&db).await.is_empty());
        let last = db
            .call(|conn| Ok(db::last_fetch_date(conn)?))
            .await
            .unwrap();
        assert_eq!(last, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mid_batch_keeps_committed_rows_and_rerun_completes() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let batch = || -> Vec<FetchedFund> {
            (1..=2000)
                .map(|code| fund(code, &format!("Fund {code}"), Some(10.0)))
                .collect()
        };
        let slow = FetchOrchestrator::new(
            db.clone(),
            FakeFetcher {
                funds: batch(),
                delay: None,
                fail: false,
            },
            Duration::from_millis(50),
            &[],
        );

        // The paused clock jumps to the deadline as soon as the first upsert is in flight.
        let err = slow.run(d("2026-01-14"), false).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Timeout {
                date: d("2026-01-14"),
                after: Duration::from_millis(50)
            }
        );
        let partial = snapshot(&db).await;
        assert!(!partial.is_empty() && partial.len() < 2000, "{} rows", partial.len());
        let last = db
            .call(|conn| Ok(db::last_fetch_date(conn)?))
            .await
            .unwrap();
        assert_eq!(last, None);

        tokio::time::resume();
        let full = FetchOrchestrator::new(
            db.clone(),
            FakeFetcher {
                funds: batch(),
                delay: None,
                fail: false,
            },
            Duration::from_secs(60),
            &[],
        );
        let summary = full.run(d("2026-01-14"), false).await.unwrap();
        assert_eq!(summary.rows_upserted, 2000);

        let rows = snapshot(&db).await;
        assert_eq!(rows.len(), 2000);
        let distinct: std::collections::BTreeSet<(i64, String)> =
            rows.iter().map(|(id, date, _)| (*id, date.clone())).collect();
        assert_eq!(distinct.len(), rows.len());
        let last = db
            .call(|conn| Ok(db::last_fetch_date(conn)?))
            .await
            .unwrap();
        assert_eq!(last, Some(d("2026-01-14")));
    }

    #[tokio::test]
    async fn test_failure_is_typed_and_does_not_record_last_fetch_date() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let fetcher = FakeFetcher {
            funds: vec![],
            delay: None,
            fail: true,
        };
        let orch = FetchOrchestrator::new(db.clone(), fetcher, Duration::from_secs(5), &[]);
        let err = orch.run(d("2026-01-14"), false).await.unwrap_err();
        assert_eq!(err.status_label(), "failed");
    }

    #[tokio::test]
    async fn test_ineligible_category_is_classified_at_upsert() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let mut overseas = fund(9, "Overseas FoF", Some(30.0));
        overseas.category = "Other Scheme - FoF Overseas".to_string();
        let fetcher = FakeFetcher {
            funds: vec![overseas],
            delay: None,
            fail: false,
        };
        let orch = FetchOrchestrator::new(
            db.clone(),
            fetcher,
            Duration::from_secs(5),
            &["Other Scheme - FoF Overseas".to_string()],
        );
        orch.run(d("2026-01-14"), false).await.unwrap();
        let funds = db.call(|conn| Ok(db::list_funds(conn)?)).await.unwrap();
        assert!(!funds[0].eligibility.is_eligible());
    }

    #[test]
    fn test_command_args_substitute_date_and_refresh_flag() {
        let f = CommandFetcher::new(
            "python3",
            vec!["bulk_scraper.py".into(), "-d".into(), "{date}".into()],
        );
        assert_eq!(
            f.command_args(d("2026-01-14"), false),
            vec!["bulk_scraper.py", "-d", "2026-01-14"]
        );
        assert_eq!(
            f.command_args(d("2026-01-14"), true).last().map(String::as_str),
            Some("--refresh")
        );
    }

    #[test]
    fn test_parse_json_lines_skips_progress_output() {
        let out = "Fetching page 1/3\n\
                   {\"scheme_code\": 1, \"fund_name\": \"A\", \"roi_1y\": 1.0, \"roi_2y\": null, \"roi_3y\": 12.0}\n\
                   \n\
                   done\n";
        let funds = parse_json_lines(out).unwrap();
        assert_eq!(funds.len(), 1);
        assert_eq!(funds[0].roi_3y, Some(12.0));

        assert!(parse_json_lines("{\"scheme_code\": \"x\"}").is_err());
    }

    #[tokio::test]
    async fn test_command_fetcher_runs_program() {
        let f = CommandFetcher::new(
            "sh",
            vec![
                "-c".into(),
                "echo '{\"scheme_code\": 5, \"fund_name\": \"X\", \"roi_1y\": null, \"roi_2y\": null, \"roi_3y\": 3.5}'"
                    .into(),
            ],
        );
        let funds = f.fetch(d("2026-01-14"), false).await.unwrap();
        assert_eq!(funds.len(), 1);
        assert_eq!(funds[0].scheme_code, 5);
    }

    #[tokio::test]
    async fn test_command_fetcher_nonzero_exit_is_failed() {
        let f = CommandFetcher::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        let err = f.fetch(d("2026-01-14"), false).await.unwrap_err();
        match err {
            FetchError::Failed { reason, .. } => assert!(reason.contains("boom"), "{reason}"),
            other @ FetchError::Timeout { .. } => panic!("unexpected {other:?}"),
        }
    }
}
