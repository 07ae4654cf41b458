//! Per-date normalisation of roi_3y against the best eligible fund on that date.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use common::types::{BenchmarkEligibility, FundId, ReturnObservation};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledPoint {
    pub raw: Option<f64>,
    pub scaled: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaledTable {
    /// `None` when no eligible fund has a positive roi_3y that day.
    pub benchmarks: BTreeMap<NaiveDate, Option<f64>>,
    pub points: HashMap<FundId, BTreeMap<NaiveDate, ScaledPoint>>,
}

impl ScaledTable {
    pub fn point(&self, fund_id: FundId, date: NaiveDate) -> Option<ScaledPoint> {
        self.points.get(&fund_id)?.get(&date).copied()
    }

    pub fn scaled(&self, fund_id: FundId, date: NaiveDate) -> Option<f64> {
        self.point(fund_id, date)?.scaled
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `round(roi / benchmark * 100, 2)` clamped to `[0, 100]`.
pub fn scale(roi: Option<f64>, benchmark: Option<f64>) -> Option<f64> {
    let bm = benchmark.filter(|b| *b > 0.0)?;
    Some(round2(roi? / bm * 100.0).clamp(0.0, 100.0))
}

/// Largest non-null roi_3y among eligible funds on each of `dates`.
pub fn benchmarks(
    observations: &[ReturnObservation],
    eligibility: &HashMap<FundId, BenchmarkEligibility>,
    dates: &[NaiveDate],
) -> BTreeMap<NaiveDate, Option<f64>> {
    let mut max: BTreeMap<NaiveDate, Option<f64>> = dates.iter().map(|d| (*d, None)).collect();
    for obs in observations {
        let eligible = eligibility
            .get(&obs.fund_id)
            .is_none_or(|e| e.is_eligible());
        if !eligible {
            continue;
        }
        let Some(roi) = obs.roi_3y else {
            continue;
        };
        let slot = max.entry(obs.report_date).or_insert(None);
        *slot = Some(slot.map_or(roi, |m| m.max(roi)));
    }
    max.into_iter()
        .map(|(d, m)| (d, m.filter(|v| *v > 0.0)))
        .collect()
}

/// Scale every observation against its own date's benchmark. Dates are independent.
pub fn scale_all(
    observations: &[ReturnObservation],
    eligibility: &HashMap<FundId, BenchmarkEligibility>,
    dates: &[NaiveDate],
) -> ScaledTable {
    let benchmarks = benchmarks(observations, eligibility, dates);
    let mut points: HashMap<FundId, BTreeMap<NaiveDate, ScaledPoint>> = HashMap::new();
    for obs in observations {
        let bm = benchmarks.get(&obs.report_date).copied().flatten();
        points.entry(obs.fund_id).or_default().insert(
            obs.report_date,
            ScaledPoint {
                raw: obs.roi_3y,
                scaled: scale(obs.roi_3y, bm),
            },
        );
    }
    ScaledTable { benchmarks, points }
}
