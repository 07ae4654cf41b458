use std::cmp::Ordering;
use std::collections::BTreeSet;

use anyhow::Result;
use chrono::NaiveDate;
use common::db::{self, AsyncDb};
use common::types::FundId;
use rusqlite::params;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    pub fund_ids: BTreeSet<FundId>,
    pub watchlist: BTreeSet<FundId>,
}

impl Universe {
    pub fn ids(&self) -> Vec<FundId> {
        self.fund_ids.iter().copied().collect()
    }
}

/// roi_3y descending, nulls last, fund id ascending.
pub fn rank_order(a: &(FundId, Option<f64>), b: &(FundId, Option<f64>)) -> Ordering {
    match (a.1, b.1) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.0.cmp(&b.0))
}

/// Top `k` by [`rank_order`] unioned with the watchlist.
pub fn select(
    mut candidates: Vec<(FundId, Option<f64>)>,
    k: usize,
    watchlist: &BTreeSet<FundId>,
) -> Universe {
    candidates.sort_by(rank_order);
    let mut fund_ids: BTreeSet<FundId> = candidates.into_iter().take(k).map(|(id, _)| id).collect();
    fund_ids.extend(watchlist.iter().copied());
    Universe {
        fund_ids,
        watchlist: watchlist.clone(),
    }
}

/// Every fund paired with its roi_3y on `reference` (null when it has no row that day).
pub fn candidates_on(
    conn: &rusqlite::Connection,
    reference: Option<NaiveDate>,
) -> rusqlite::Result<Vec<(FundId, Option<f64>)>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, r.roi_3y
         FROM funds f
         LEFT JOIN fund_returns r ON r.fund_id = f.id AND r.report_date = ?1
         ORDER BY f.id",
    )?;
    let rows = stmt
        .query_map(params![reference], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn load(conn: &rusqlite::Connection, reference: Option<NaiveDate>, k: usize) -> Result<Universe> {
    let candidates = candidates_on(conn, reference)?;
    let watchlist: BTreeSet<FundId> = db::watchlist_fund_ids(conn)?.into_iter().collect();
    Ok(select(candidates, k, &watchlist))
}

pub async fn load_async(db: &AsyncDb, reference: Option<NaiveDate>, k: usize) -> Result<Universe> {
    db.call_named("universe.load", move |conn| load(conn, reference, k))
        .await
}
