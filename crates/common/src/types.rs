use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type FundId = i64;

/// Whether a fund may set the per-date benchmark (the maximum eligible ROI).
///
/// Ineligible funds are still scaled against the benchmark; they just never
/// define it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkEligibility {
    Eligible,
    Ineligible,
}

impl BenchmarkEligibility {
    /// Classify a category against the configured list of ineligible categories.
    /// Matching is exact on the trimmed category name.
    pub fn classify(category: &str, ineligible_categories: &[String]) -> Self {
        let category = category.trim();
        if ineligible_categories.iter().any(|c| c.trim() == category) {
            Self::Ineligible
        } else {
            Self::Eligible
        }
    }

    pub fn is_eligible(self) -> bool {
        self == Self::Eligible
    }

    pub fn as_db(self) -> i64 {
        match self {
            Self::Eligible => 1,
            Self::Ineligible => 0,
        }
    }

    pub fn from_db(v: i64) -> Self {
        if v == 0 {
            Self::Ineligible
        } else {
            Self::Eligible
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fund {
    pub id: FundId,
    pub scheme_code: Option<i64>,
    pub fund_name: String,
    pub fund_house: String,
    pub category: String,
    pub focus: Option<String>,
    pub eligibility: BenchmarkEligibility,
}

/// One stored return row, unique per (fund, report_date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnObservation {
    pub fund_id: FundId,
    pub report_date: NaiveDate,
    pub roi_1y: Option<f64>,
    pub roi_2y: Option<f64>,
    pub roi_3y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchlistEntry {
    pub fund_id: FundId,
    pub fund_name: String,
    pub added_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Up,
    Down,
}

impl ChangeType {
    pub fn from_percent(change_percent: f64) -> Self {
        if change_percent > 0.0 {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificantMarketChange {
    pub index_name: String,
    pub change_date: NaiveDate,
    pub previous_close: f64,
    pub current_close: f64,
    pub change_percent: f64,
    pub change_type: ChangeType,
}

/// A fund record as produced by the external fund-data fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedFund {
    pub scheme_code: i64,
    pub fund_name: String,
    #[serde(default = "unknown")]
    pub fund_house: String,
    #[serde(default = "unknown")]
    pub category: String,
    pub roi_1y: Option<f64>,
    pub roi_2y: Option<f64>,
    pub roi_3y: Option<f64>,
}

fn unknown() -> String {
    "Unknown".to_string()
}
