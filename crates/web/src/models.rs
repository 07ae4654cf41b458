use chrono::NaiveDate;
use common::types::FundId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FreshnessView {
    pub today: NaiveDate,
    pub latest_report_date: Option<NaiveDate>,
    pub last_fetch_date: Option<NaiveDate>,
    pub fetch_needed: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WatchlistChange {
    pub fund_id: FundId,
    /// False when the request was a no-op (already pinned / not pinned).
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    /// Comma-separated `YYYY-MM-DD` dates.
    pub dates: Option<String>,
    pub limit: Option<usize>,
}

impl CompareQuery {
    pub fn parse_dates(&self) -> Result<Vec<NaiveDate>, String> {
        let raw = self.dates.as_deref().unwrap_or("");
        let dates = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| format!("invalid date {s} (want YYYY-MM-DD): {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if dates.is_empty() {
            return Err("dates is required, e.g. ?dates=2026-01-05,2026-01-14".to_string());
        }
        Ok(dates)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(dates: Option<&str>) -> CompareQuery {
        CompareQuery {
            dates: dates.map(str::to_string),
            limit: None,
        }
    }

    #[test]
    fn test_parse_dates_splits_and_trims() {
        let dates = q(Some("2026-01-05, 2026-01-14,")).parse_dates().unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 14).unwrap()
            ]
        );
    }

    #[test]
    fn test_parse_dates_rejects_missing_or_malformed() {
        assert!(q(None).parse_dates().is_err());
        assert!(q(Some(",")).parse_dates().is_err());
        assert!(q(Some("14/01/2026")).parse_dates().is_err());
    }
}
