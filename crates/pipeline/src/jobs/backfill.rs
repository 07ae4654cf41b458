use anyhow::Result;
use chrono::NaiveDate;
use common::db::{self, AsyncDb};
use tracing::Instrument;

use super::{fetch_and_detect, DateRun, JobTracker};
use crate::cache::ResultCache;
use crate::fetch::{FetchOrchestrator, FundDataFetcher};
use crate::significance::{IndexFeed, SignificantDateDetector};

pub const BACKFILL_JOB: &str = "backfill";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillParams {
    /// Only dates on or after this one.
    pub since: Option<NaiveDate>,
    pub max_dates: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    /// Significant dates with no returns before the run, ignoring `max_dates`.
    pub missing: usize,
    pub runs: Vec<DateRun>,
}

impl BackfillReport {
    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.fetch_error.is_some()).count()
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "missing": self.missing,
            "attempted": self.runs.len(),
            "failed": self.failed(),
            "rows_upserted": self.runs.iter().map(|r| r.rows_upserted).sum::<usize>(),
        })
    }
}

/// Fetches returns for past dates: either every recorded significant date that has no
/// returns yet, or one explicit date.
pub struct BackfillJob<'a, F, I> {
    pub db: &'a AsyncDb,
    pub orchestrator: &'a FetchOrchestrator<F>,
    pub detector: SignificantDateDetector<'a, I>,
    pub cache: Option<&'a ResultCache>,
}

impl<F, I> BackfillJob<'_, F, I>
where
    F: FundDataFetcher + Sync,
    I: IndexFeed + Sync,
{
    /// Newest missing dates first. A failed date is reported and the run moves on.
    pub async fn run(&self, params: BackfillParams) -> Result<BackfillReport> {
        let tracker = JobTracker::start(self.db, BACKFILL_JOB).await?;

        let index = self.detector.index_name.to_string();
        let missing = self
            .db
            .call_named("backfill.missing_dates", move |conn| {
                Ok(db::significant_dates_without_returns(conn, &index, params.since)?)
            })
            .await?;

        let mut report = BackfillReport {
            missing: missing.len(),
            runs: Vec::new(),
        };
        tracing::info!(
            missing = report.missing,
            max_dates = params.max_dates,
            "backfilling significant dates"
        );

        for date in missing.into_iter().take(params.max_dates) {
            let span = tracing::info_span!("backfill_date", %date);
            let run = fetch_and_detect(self.db, self.orchestrator, &self.detector, date, false)
                .instrument(span)
                .await?;
            report.runs.push(run);
        }

        self.invalidate_if_written(&report.runs);
        if report.failed() == 0 {
            tracker.success(report.metadata()).await?;
        } else {
            let msg = format!("{} of {} dates failed", report.failed(), report.runs.len());
            tracker.fail(&msg, report.metadata()).await?;
        }
        Ok(report)
    }

    /// Fetch and classify a single date regardless of what is stored for it.
    pub async fn run_date(&self, date: NaiveDate, refresh: bool) -> Result<DateRun> {
        let run = fetch_and_detect(self.db, self.orchestrator, &self.detector, date, refresh).await?;
        self.invalidate_if_written(std::slice::from_ref(&run));
        Ok(run)
    }

    fn invalidate_if_written(&self, runs: &[DateRun]) {
        if runs.iter().any(|r| r.rows_upserted > 0) {
            if let Some(cache) = self.cache {
                cache.invalidate();
            }
        }
    }
}
