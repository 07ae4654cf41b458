use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::NaiveDate;
use common::config::Config;
use common::db::{self, AsyncDb};
use common::types::{BenchmarkEligibility, FundId};
use serde::Serialize;

use crate::date_set::{self, DateSet, DateSetParams};
use crate::focus;
use crate::returns_loader;
use crate::scaling::{self, ScaledTable};
use crate::trend::{self, TrendParams, TrendSignals};
use crate::universe;

#[derive(Debug, Clone)]
pub struct ComposeParams {
    pub top_k: usize,
    pub dates: DateSetParams,
    pub page_size: u32,
    pub trend: TrendParams,
    pub index_name: String,
}

impl ComposeParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            top_k: cfg.analysis.top_k,
            dates: DateSetParams {
                window_days: cfg.analysis.window_days,
                max_display: cfg.analysis.display_dates,
            },
            page_size: cfg.analysis.page_size,
            trend: TrendParams::from(&cfg.analysis),
            index_name: cfg.significance.index_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendRow {
    pub fund_id: FundId,
    pub fund_name: String,
    pub fund_house: String,
    pub category: String,
    pub focus: String,
    pub watchlisted: bool,
    /// Scaled roi over the window dates, oldest first.
    pub sparkline: Vec<Option<f64>>,
    /// Scaled roi per display date, newest first.
    pub display_values: Vec<Option<f64>>,
    #[serde(flatten)]
    pub signals: TrendSignals,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrendTable {
    /// Latest stored report date; `None` when there is no data yet.
    pub reference_date: Option<NaiveDate>,
    pub display_dates: Vec<NaiveDate>,
    pub window_dates: Vec<NaiveDate>,
    pub benchmarks: BTreeMap<NaiveDate, Option<f64>>,
    pub rows: Vec<TrendRow>,
}

/// Multiplier ascending (deepest consistent dips first), nulls last, then fund id.
fn row_order(a: &TrendRow, b: &TrendRow) -> Ordering {
    match (a.signals.multiplier, b.signals.multiplier) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.fund_id.cmp(&b.fund_id))
}

struct Inputs {
    reference: NaiveDate,
    universe: universe::Universe,
    in_returns: DateSet,
    significant: DateSet,
}

async fn load_inputs(db: &AsyncDb, params: &ComposeParams) -> Result<Option<Inputs>> {
    let k = params.top_k;
    let index = params.index_name.clone();
    db.call_named("compose.inputs", move |conn| {
        let Some(reference) = db::latest_report_date(conn)? else {
            return Ok(None);
        };
        let universe = universe::load(conn, Some(reference), k)?;
        let in_returns = db::report_dates_for_funds(conn, &universe.ids())?
            .into_iter()
            .collect();
        let significant = db::significant_changes(conn, &index)?
            .into_iter()
            .map(|c| c.change_date)
            .collect();
        Ok(Some(Inputs {
            reference,
            universe,
            in_returns,
            significant,
        }))
    })
    .await
}

/// Universe → dates → paged returns → per-date scaling → trend signals.
pub async fn build_trend_table(db: &AsyncDb, params: &ComposeParams) -> Result<TrendTable> {
    let start = std::time::Instant::now();

    let Some(inputs) = load_inputs(db, params).await? else {
        tracing::info!("no returns stored yet; trend table is empty");
        return Ok(TrendTable::default());
    };
    let fund_ids = inputs.universe.ids();
    let sets = date_set::build(
        params.dates,
        inputs.reference,
        &inputs.in_returns,
        &inputs.significant,
    );

    let observations = returns_loader::load_all(db, &fund_ids, &sets.calc, params.page_size).await?;
    let ids = fund_ids.clone();
    let funds = db
        .call_named("compose.funds", move |conn| Ok(db::funds_by_ids(conn, &ids)?))
        .await?;
    let eligibility: HashMap<FundId, BenchmarkEligibility> =
        funds.iter().map(|f| (f.id, f.eligibility)).collect();

    let scaled = scaling::scale_all(&observations, &eligibility, &sets.calc);

    let mut rows: Vec<TrendRow> = funds
        .into_iter()
        .map(|fund| {
            let sparkline = series(&scaled, fund.id, &sets.window);
            let today = scaled.point(fund.id, sets.today);
            let signals = trend::compute(
                &sparkline,
                today.and_then(|p| p.scaled),
                today.and_then(|p| p.raw),
                params.trend,
            );
            TrendRow {
                watchlisted: inputs.universe.watchlist.contains(&fund.id),
                focus: focus::focus_for(fund.focus.as_deref(), &fund.fund_name),
                display_values: series(&scaled, fund.id, &sets.display),
                sparkline,
                signals,
                fund_id: fund.id,
                fund_name: fund.fund_name,
                fund_house: fund.fund_house,
                category: fund.category,
            }
        })
        .collect();
    rows.sort_by(row_order);

    let ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("fundtrend_compute_latency_ms").record(ms);
    metrics::gauge!("fundtrend_universe_size").set(fund_ids.len() as f64);
    tracing::info!(
        reference_date = %inputs.reference,
        funds = rows.len(),
        window_dates = sets.window.len(),
        display_dates = sets.display.len(),
        observations = observations.len(),
        "trend table composed"
    );

    Ok(TrendTable {
        reference_date: Some(inputs.reference),
        display_dates: sets.display,
        window_dates: sets.window,
        benchmarks: scaled.benchmarks,
        rows,
    })
}

fn series(scaled: &ScaledTable, fund_id: FundId, dates: &[NaiveDate]) -> Vec<Option<f64>> {
    dates.iter().map(|d| scaled.scaled(fund_id, *d)).collect()
}
