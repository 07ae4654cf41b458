//! Post-run invariant checks. Exit code 0 when every check passes, 1 otherwise.

use std::fmt;

use anyhow::Result;
use common::db::{self, AsyncDb};

use crate::compose::{self, ComposeParams, TrendTable};
use crate::universe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checks: Vec<Check>,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn exit_code(&self) -> i32 {
        i32::from(!self.all_passed())
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.checks {
            let mark = if c.passed { "PASS" } else { "FAIL" };
            writeln!(f, "[{mark}] {:<28} {}", c.name, c.detail)?;
        }
        let failed = self.checks.iter().filter(|c| !c.passed).count();
        write!(f, "{} checks, {failed} failed", self.checks.len())
    }
}

fn check_scaled_bounds(table: &TrendTable) -> Check {
    let bad: Vec<String> = table
        .rows
        .iter()
        .flat_map(|r| {
            table
                .window_dates
                .iter()
                .zip(&r.sparkline)
                .chain(table.display_dates.iter().zip(&r.display_values))
                .filter_map(move |(d, v)| {
                    let v = (*v)?;
                    let positive = table.benchmarks.get(d).copied().flatten().is_some_and(|b| b > 0.0);
                    (positive && !(0.0..=100.0).contains(&v))
                        .then(|| format!("fund {} on {d}: {v}", r.fund_id))
                })
        })
        .collect();
    if bad.is_empty() {
        Check::new("scaled_roi_bounded", true, format!("{} funds", table.rows.len()))
    } else {
        Check::new("scaled_roi_bounded", false, bad.join("; "))
    }
}

fn check_today_once(table: &TrendTable) -> Check {
    let Some(today) = table.reference_date else {
        return Check::new("today_displayed_once", true, "no data yet");
    };
    let n = table.display_dates.iter().filter(|d| **d == today).count();
    Check::new(
        "today_displayed_once",
        n == 1,
        format!("{today} appears {n} time(s)"),
    )
}

pub async fn run(db: &AsyncDb, params: &ComposeParams, threshold_pct: f64) -> Result<VerifyReport> {
    let mut checks = Vec::new();

    let dupes: i64 = db
        .call_named("verify.duplicates", |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM (
                    SELECT fund_id, report_date FROM fund_returns
                    GROUP BY fund_id, report_date HAVING COUNT(*) > 1
                 )",
                [],
                |row| row.get(0),
            )?)
        })
        .await?;
    checks.push(Check::new(
        "no_duplicate_returns",
        dupes == 0,
        format!("{dupes} duplicated (fund, date) keys"),
    ));

    let table = compose::build_trend_table(db, params).await?;
    checks.push(check_scaled_bounds(&table));
    checks.push(check_today_once(&table));

    let k = params.top_k;
    let reference = table.reference_date;
    let (total, uni) = db
        .call_named("verify.universe", move |conn| {
            Ok((db::count_funds(conn)?, universe::load(conn, reference, k)?))
        })
        .await?;
    let size_ok = uni.fund_ids.len() >= k.min(total);
    let superset = uni.watchlist.is_subset(&uni.fund_ids);
    checks.push(Check::new(
        "universe_covers_watchlist",
        size_ok && superset,
        format!(
            "{} funds (min {}), watchlist {} included: {superset}",
            uni.fund_ids.len(),
            k.min(total),
            uni.watchlist.len()
        ),
    ));

    let index = params.index_name.clone();
    let changes = db
        .call_named("verify.significant", move |conn| {
            Ok(db::significant_changes(conn, &index)?)
        })
        .await?;
    let bad: Vec<String> = changes
        .iter()
        .filter(|c| {
            c.change_percent.abs() < threshold_pct
                || c.change_type != common::types::ChangeType::from_percent(c.change_percent)
        })
        .map(|c| format!("{} {:+.2}% {}", c.change_date, c.change_percent, c.change_type.as_str()))
        .collect();
    checks.push(Check::new(
        "significant_changes_valid",
        bad.is_empty(),
        if bad.is_empty() {
            format!("{} recorded", changes.len())
        } else {
            bad.join("; ")
        },
    ));

    let report = VerifyReport { checks };
    if report.all_passed() {
        tracing::info!("verification passed");
    } else {
        tracing::error!(%report, "verification failed");
    }
    Ok(report)
}
