use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::NaiveDate;
use common::types::FundId;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::universe::rank_order;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareRow {
    pub rank: usize,
    pub fund_id: FundId,
    pub fund_name: String,
    pub fund_house: String,
    pub category: String,
    /// roi_3y per requested date, oldest first.
    pub values: Vec<Option<f64>>,
    /// Last non-null value minus the first non-null value.
    pub change: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Comparison {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<CompareRow>,
}

struct FundValues {
    name: String,
    house: String,
    category: String,
    by_date: BTreeMap<NaiveDate, Option<f64>>,
}

pub fn change_over(values: &[Option<f64>]) -> Option<f64> {
    let first = values.iter().flatten().next()?;
    let last = values.iter().rev().flatten().next()?;
    Some(crate::scaling::round2(last - first))
}

/// Side-by-side roi_3y for `dates`, ranked by the latest requested date.
pub fn compare_by_dates(conn: &Connection, dates: &[NaiveDate], limit: usize) -> Result<Comparison> {
    let dates: Vec<NaiveDate> = dates.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    let Some(latest) = dates.last().copied() else {
        return Ok(Comparison::default());
    };

    let mut stmt = conn.prepare(
        "SELECT r.fund_id, f.fund_name, f.fund_house, f.category, r.report_date, r.roi_3y
         FROM fund_returns r
         JOIN funds f ON f.id = r.fund_id
         WHERE r.report_date IN (SELECT value FROM json_each(?1))",
    )?;
    let mut funds: BTreeMap<FundId, FundValues> = BTreeMap::new();
    let mut cursor = stmt.query(params![serde_json::to_string(&dates)?])?;
    while let Some(row) = cursor.next()? {
        let fund_id: FundId = row.get(0)?;
        let entry = match funds.entry(fund_id) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => e.insert(FundValues {
                name: row.get(1)?,
                house: row.get(2)?,
                category: row.get(3)?,
                by_date: BTreeMap::new(),
            }),
        };
        entry.by_date.insert(row.get(4)?, row.get(5)?);
    }

    let mut ranked: Vec<(FundId, Option<f64>)> = funds
        .iter()
        .map(|(id, f)| (*id, f.by_date.get(&latest).copied().flatten()))
        .collect();
    ranked.sort_by(rank_order);

    let rows = ranked
        .into_iter()
        .take(limit)
        .enumerate()
        .filter_map(|(i, (id, _))| {
            let f = funds.remove(&id)?;
            let values: Vec<Option<f64>> = dates
                .iter()
                .map(|d| f.by_date.get(d).copied().flatten())
                .collect();
            Some(CompareRow {
                rank: i + 1,
                fund_id: id,
                fund_name: f.name,
                fund_house: f.house,
                category: f.category,
                change: change_over(&values),
                values,
            })
        })
        .collect();

    Ok(Comparison { dates, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::db::{self, Database};
    use common::types::FetchedFund;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seed(db: &Database, code: i64, rois: &[(&str, Option<f64>)]) -> FundId {
        let mut f = FetchedFund {
            scheme_code: code,
            fund_name: format!("Fund {code}"),
            fund_house: "House".into(),
            category: "Equity".into(),
            roi_1y: None,
            roi_2y: None,
            roi_3y: None,
        };
        let id = db::upsert_fund(&db.conn, &f, &[]).unwrap();
        for (date, roi) in rois {
            f.roi_3y = *roi;
            db::upsert_return(&db.conn, id, d(date), &f, "fetch").unwrap();
        }
        id
    }

    #[test]
    fn test_change_over_skips_nulls() {
        assert_eq!(change_over(&[None, Some(10.0), None, Some(12.5), None]), Some(2.5));
        assert_eq!(change_over(&[Some(4.0)]), Some(0.0));
        assert_eq!(change_over(&[None, None]), None);
    }

    #[test]
    fn test_compare_ranks_by_latest_date_and_limits() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        let a = seed(&db, 1, &[("2026-01-01", Some(10.0)), ("2026-01-14", Some(15.0))]);
        let b = seed(&db, 2, &[("2026-01-01", Some(20.0)), ("2026-01-14", Some(18.0))]);
        let c = seed(&db, 3, &[("2026-01-01", Some(30.0)), ("2026-01-14", None)]);
        seed(&db, 4, &[("2025-06-01", Some(99.0))]);

        // Requested out of order; output is ascending.
        let cmp = compare_by_dates(&db.conn, &[d("2026-01-14"), d("2026-01-01")], 10).unwrap();
        assert_eq!(cmp.dates, vec![d("2026-01-01"), d("2026-01-14")]);
        let order: Vec<FundId> = cmp.rows.iter().map(|r| r.fund_id).collect();
        assert_eq!(order, vec![b, a, c]);
        assert_eq!(cmp.rows[0].rank, 1);
        assert_eq!(cmp.rows[0].change, Some(-2.0));
        assert_eq!(cmp.rows[1].change, Some(5.0));
        assert_eq!(cmp.rows[2].values, vec![Some(30.0), None]);
        assert_eq!(cmp.rows[2].change, Some(0.0));

        let top1 = compare_by_dates(&db.conn, &[d("2026-01-01"), d("2026-01-14")], 1).unwrap();
        assert_eq!(top1.rows.len(), 1);
        assert_eq!(top1.rows[0].fund_id, b);
    }

    #[test]
    fn test_compare_no_dates_is_empty() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        assert_eq!(compare_by_dates(&db.conn, &[], 10).unwrap(), Comparison::default());
    }
}
