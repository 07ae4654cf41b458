use anyhow::Result;
use chrono::{FixedOffset, NaiveDate, Utc};
use common::db::{self, AsyncDb};
use tokio::sync::mpsc;
use tracing::Instrument;

use super::JobTracker;
use crate::cache::ResultCache;
use crate::fetch::{FetchOrchestrator, FundDataFetcher};
use crate::freshness;
use crate::significance::{DetectionOutcome, IndexFeed, SignificantDateDetector};

pub const REFRESH_JOB: &str = "refresh";

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub today: NaiveDate,
    pub latest_before: Option<NaiveDate>,
    pub fetch_needed: bool,
    pub rows_upserted: usize,
    pub fetch_error: Option<String>,
    pub detection: Option<DetectionOutcome>,
}

impl RefreshReport {
    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "today": self.today.to_string(),
            "latest_before": self.latest_before.map(|d| d.to_string()),
            "fetch_needed": self.fetch_needed,
            "rows_upserted": self.rows_upserted,
            "detection": self.detection.as_ref().map(|d| match d {
                DetectionOutcome::AlreadyRecorded => "already_recorded",
                DetectionOutcome::Unavailable => "unavailable",
                DetectionOutcome::BelowThreshold(_) => "below_threshold",
                DetectionOutcome::Recorded(_) => "recorded",
            }),
        })
    }
}

/// Outcome of fetching one date and classifying it.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRun {
    pub date: NaiveDate,
    pub rows_upserted: usize,
    pub fetch_error: Option<String>,
    pub detection: Option<DetectionOutcome>,
}

/// Fetch `date`, then look for a significant index move on it if any rows landed.
/// A fetch failure still counts rows committed before it; detection errors are logged.
pub async fn fetch_and_detect<F, I>(
    db: &AsyncDb,
    orchestrator: &FetchOrchestrator<F>,
    detector: &SignificantDateDetector<'_, I>,
    date: NaiveDate,
    refresh: bool,
) -> Result<DateRun>
where
    F: FundDataFetcher + Sync,
    I: IndexFeed + Sync,
{
    let mut run = DateRun {
        date,
        rows_upserted: 0,
        fetch_error: None,
        detection: None,
    };
    match orchestrator.run(date, refresh).await {
        Ok(summary) => run.rows_upserted = summary.rows_upserted,
        Err(e) => {
            run.fetch_error = Some(e.to_string());
            run.rows_upserted = db
                .call_named("refresh.count_date", move |conn| {
                    Ok(db::count_returns_on(conn, date)?)
                })
                .await?;
        }
    }

    // Nothing landed for the date, so there is nothing to classify.
    if run.rows_upserted > 0 {
        run.detection = match detector.detect(date).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(%date, error = %e, "significant-date detection failed");
                None
            }
        };
    }
    Ok(run)
}

/// One freshness-gated refresh: fetch today's returns if missing, then look for a
/// significant index move on that date, then drop the cached snapshot.
pub struct RefreshJob<'a, F, I> {
    pub db: &'a AsyncDb,
    pub orchestrator: &'a FetchOrchestrator<F>,
    pub detector: SignificantDateDetector<'a, I>,
    pub cache: Option<&'a ResultCache>,
}

impl<F, I> RefreshJob<'_, F, I>
where
    F: FundDataFetcher + Sync,
    I: IndexFeed + Sync,
{
    /// Fetch failures are reported, not returned as errors; only storage errors
    /// outside the fetch itself abort the run.
    pub async fn run_once(&self, today: NaiveDate, force: bool) -> Result<RefreshReport> {
        let tracker = JobTracker::start(self.db, REFRESH_JOB).await?;

        let latest_before = self
            .db
            .call_named("refresh.latest_date", |conn| Ok(db::latest_report_date(conn)?))
            .await?;
        let gate = freshness::check(latest_before, today);
        let mut report = RefreshReport {
            today,
            latest_before,
            fetch_needed: gate.fetch_needed,
            rows_upserted: 0,
            fetch_error: None,
            detection: None,
        };

        if !gate.fetch_needed && !force {
            tracing::info!(%today, "returns already current; nothing to fetch");
            tracker.success(report.metadata()).await?;
            return Ok(report);
        }

        let run = fetch_and_detect(self.db, self.orchestrator, &self.detector, today, force).await?;
        report.rows_upserted = run.rows_upserted;
        report.fetch_error = run.fetch_error;
        report.detection = run.detection;
        if report.rows_upserted > 0 {
            if let Some(cache) = self.cache {
                cache.invalidate();
            }
        }

        match &report.fetch_error {
            None => tracker.success(report.metadata()).await?,
            Some(err) => tracker.fail(err, report.metadata()).await?,
        }
        Ok(report)
    }
}

/// Runs [`RefreshJob::run_once`] for every scheduler tick until the channel closes.
pub async fn run_refresh_loop<F, I>(
    job: RefreshJob<'_, F, I>,
    offset: FixedOffset,
    mut ticks: mpsc::Receiver<()>,
) where
    F: FundDataFetcher + Sync,
    I: IndexFeed + Sync,
{
    while ticks.recv().await.is_some() {
        let today = freshness::today_in(Utc::now(), offset);
        let span = tracing::info_span!("job_run", job = REFRESH_JOB, %today);
        match job.run_once(today, false).instrument(span).await {
            Ok(report) => tracing::debug!(?report, "refresh run finished"),
            Err(e) => tracing::error!(error = %e, "refresh run failed"),
        }
    }
}
