use anyhow::Result;
use chrono::NaiveDate;
use common::db::{ids_to_json, AsyncDb};
use common::types::{FundId, ReturnObservation};
use rusqlite::params;

/// One page of return rows for a (fund set, date set), ordered by (fund_id, report_date).
pub trait ReturnsPager {
    fn fetch_returns_page(
        &self,
        fund_ids: &[FundId],
        dates: &[NaiveDate],
        limit: u32,
        offset: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ReturnObservation>>> + Send;
}

impl ReturnsPager for AsyncDb {
    async fn fetch_returns_page(
        &self,
        fund_ids: &[FundId],
        dates: &[NaiveDate],
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ReturnObservation>> {
        let ids_json = ids_to_json(fund_ids);
        let dates_json = serde_json::to_string(dates)?;
        self.call_named("returns.page", move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT fund_id, report_date, roi_1y, roi_2y, roi_3y
                 FROM fund_returns
                 WHERE fund_id IN (SELECT value FROM json_each(?1))
                   AND report_date IN (SELECT value FROM json_each(?2))
                 ORDER BY fund_id ASC, report_date ASC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(params![ids_json, dates_json, limit, offset], |row| {
                    Ok(ReturnObservation {
                        fund_id: row.get(0)?,
                        report_date: row.get(1)?,
                        roi_1y: row.get(2)?,
                        roi_2y: row.get(3)?,
                        roi_3y: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

/// Page through every matching row and return them as one sequence.
pub async fn load_all<P: ReturnsPager + Sync>(
    pager: &P,
    fund_ids: &[FundId],
    dates: &[NaiveDate],
    page_size: u32,
) -> Result<Vec<ReturnObservation>> {
    let limit = page_size.max(1);
    let mut offset = 0_u32;
    let mut out = Vec::new();

    if fund_ids.is_empty() || dates.is_empty() {
        return Ok(out);
    }

    loop {
        let page = pager.fetch_returns_page(fund_ids, dates, limit, offset).await?;
        let page_len = page.len();
        out.extend(page);

        // A short page is the last one.
        if page_len < limit as usize {
            break;
        }
        offset += limit;
    }

    tracing::debug!(rows = out.len(), pages = offset / limit + 1, "returns loaded");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct VecPager {
        rows: Vec<ReturnObservation>,
        calls: AtomicUsize,
    }

    impl ReturnsPager for VecPager {
        async fn fetch_returns_page(
            &self,
            _fund_ids: &[FundId],
            _dates: &[NaiveDate],
            limit: u32,
            offset: u32,
        ) -> Result<Vec<ReturnObservation>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    fn base() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_extra_empty_page() {
        let rows: Vec<ReturnObservation> = (0..2000)
            .map(|i| ReturnObservation {
                fund_id: i,
                report_date: base(),
                roi_1y: None,
                roi_2y: None,
                roi_3y: Some(1.0),
            })
            .collect();
        let pager = VecPager {
            rows,
            calls: AtomicUsize::new(0),
        };
        let out = load_all(&pager, &[1], &[base()], 1000).await.unwrap();
        assert_eq!(out.len(), 2000);
        assert_eq!(pager.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_inputs_skip_query() {
        let pager = VecPager {
            rows: vec![],
            calls: AtomicUsize::new(0),
        };
        assert!(load_all(&pager, &[], &[base()], 1000).await.unwrap().is_empty());
        assert_eq!(pager.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_2500_rows_page_1000_complete_ordered_no_duplicates() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        // 50 funds x 50 dates, plus rows on other dates that must be filtered out.
        let dates: Vec<NaiveDate> = (0..50)
            .map(|i| base().checked_add_days(Days::new(i)).unwrap())
            .collect();
        let all_dates = dates.clone();
        let fund_ids: Vec<FundId> = db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut ids = Vec::new();
                for f in 0..50_i64 {
                    tx.execute(
                        "INSERT INTO funds (scheme_code, fund_name) VALUES (?1, ?2)",
                        params![f, format!("Fund {f}")],
                    )?;
                    let id = tx.last_insert_rowid();
                    for d in &all_dates {
                        tx.execute(
                            "INSERT INTO fund_returns (fund_id, report_date, roi_3y) VALUES (?1, ?2, ?3)",
                            params![id, d, f as f64],
                        )?;
                    }
                    tx.execute(
                        "INSERT INTO fund_returns (fund_id, report_date, roi_3y) VALUES (?1, '2024-06-01', 0.0)",
                        params![id],
                    )?;
                    ids.push(id);
                }
                tx.commit()?;
                Ok(ids)
            })
            .await
            .unwrap();

        let out = load_all(&db, &fund_ids, &dates, 1000).await.unwrap();
        assert_eq!(out.len(), 2500);

        let keys: Vec<(FundId, NaiveDate)> = out.iter().map(|r| (r.fund_id, r.report_date)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted, "rows must be ordered by (fund, date) with no duplicates");
    }
}
