use anyhow::Result;
use chrono::{Days, Utc};
use std::time::Duration;

use pipeline::cli::{self, Command};
use pipeline::compose::{self, ComposeParams};
use pipeline::fetch::{CommandFetcher, FetchOrchestrator};
use pipeline::index_feed::ChartIndexFeed;
use pipeline::jobs::{run_refresh_loop, BackfillJob, BackfillParams, RefreshJob};
use pipeline::significance::SignificantDateDetector;
use pipeline::{freshness, metrics, scheduler, verify};

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("fundtrend-pipeline", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;

    // Read-mostly CLI commands use the sync Database and exit immediately.
    if !cmd.is_async() {
        let db = common::db::Database::open(&config.database.path)?;
        db.run_migrations()?;
        return cli::run_command(&db, &cmd, &config);
    }

    let db = common::db::AsyncDb::open(&config.database.path).await?;
    let params = ComposeParams::from_config(&config);

    let orchestrator = FetchOrchestrator::new(
        db.clone(),
        CommandFetcher::from_config(&config.fetch),
        config.fetch.timeout(),
        &config.analysis.ineligible_categories,
    );
    let feed = ChartIndexFeed::from_config(&config)?;
    let detector = || SignificantDateDetector {
        db: &db,
        feed: &feed,
        index_name: &config.significance.index_name,
        threshold_pct: config.significance.threshold_pct,
    };
    // The result cache lives in the web process; nothing here reads one.
    let job = RefreshJob {
        db: &db,
        orchestrator: &orchestrator,
        detector: detector(),
        cache: None,
    };
    let backfill = BackfillJob {
        db: &db,
        orchestrator: &orchestrator,
        detector: detector(),
        cache: None,
    };
    let today = freshness::today_in(Utc::now(), config.fetch.offset());

    match cmd {
        Command::Refresh { force } => {
            let report = job.run_once(today, force).await?;
            println!(
                "today={} latest_before={} fetch_needed={} rows={} error={}",
                report.today,
                report
                    .latest_before
                    .map_or_else(|| "-".to_string(), |d| d.to_string()),
                report.fetch_needed,
                report.rows_upserted,
                report.fetch_error.as_deref().unwrap_or("-"),
            );
            if let Some(outcome) = report.detection {
                println!("significance: {outcome:?}");
            }
            Ok(())
        }
        Command::Backfill { recent, max_dates } => {
            let since = if recent {
                let window = u64::try_from(config.analysis.window_days).unwrap_or(0);
                today.checked_sub_days(Days::new(window))
            } else {
                None
            };
            let report = backfill.run(BackfillParams { since, max_dates }).await?;
            for run in &report.runs {
                cli::print_date_run(run);
            }
            println!(
                "missing={} attempted={} failed={}",
                report.missing,
                report.runs.len(),
                report.failed()
            );
            Ok(())
        }
        Command::Fetch { date, force } => {
            let run = backfill.run_date(date, force).await?;
            cli::print_date_run(&run);
            Ok(())
        }
        Command::Trends { limit } => {
            let table = compose::build_trend_table(&db, &params).await?;
            cli::print_trends(&table, limit);
            Ok(())
        }
        Command::Verify => {
            let report = verify::run(&db, &params, config.significance.threshold_pct).await?;
            println!("{report}");
            std::process::exit(report.exit_code());
        }
        Command::Run => {
            metrics::install_prometheus(config.observability.prometheus_port)?;
            metrics::describe();
            tracing::info!(
                interval_secs = config.fetch.refresh_interval_secs,
                "fundtrend pipeline starting"
            );

            let (refresh_tx, refresh_rx) = tokio::sync::mpsc::channel::<()>(4);
            let _handles = scheduler::start(vec![scheduler::JobSpec {
                name: "refresh".to_string(),
                interval: Duration::from_secs(config.fetch.refresh_interval_secs.max(1)),
                tick: refresh_tx,
                run_immediately: true,
            }]);

            tokio::select! {
                () = run_refresh_loop(job, config.fetch.offset(), refresh_rx) => {
                    tracing::warn!("refresh loop ended");
                }
                res = tokio::signal::ctrl_c() => {
                    res?;
                    tracing::info!("shutdown requested");
                }
            }
            Ok(())
        }
        other => anyhow::bail!("{other:?} is not an async command"),
    }
}
