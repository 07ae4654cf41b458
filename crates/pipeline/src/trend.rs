use serde::Serialize;

use crate::scaling::round2;

#[derive(Debug, Clone, Copy)]
pub struct TrendParams {
    /// A window entry counts toward consistency when scaled roi is at least this.
    pub above_threshold: f64,
    /// `Count%` must exceed this for a Buy.
    pub consistency_cutoff_pct: f64,
}

impl From<&common::config::Analysis> for TrendParams {
    fn from(a: &common::config::Analysis) -> Self {
        Self {
            above_threshold: a.above_threshold,
            consistency_cutoff_pct: a.consistency_cutoff_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendSignals {
    pub min_6m: Option<f64>,
    pub max_6m: Option<f64>,
    pub count_above: usize,
    pub count_pct: f64,
    pub today_pct: Option<f64>,
    pub today_roi: Option<f64>,
    pub slope: i8,
    pub sell: bool,
    pub dip_max: Option<f64>,
    pub buy: bool,
    pub multiplier: Option<f64>,
}

/// Strict monotonicity of the last three entries: 1 rising, -1 falling, 0 otherwise.
/// Any null among them, or fewer than three entries, gives 0.
pub fn slope(series: &[Option<f64>]) -> i8 {
    let [.., a, b, c] = series else {
        return 0;
    };
    let (Some(v0), Some(v1), Some(v2)) = (*a, *b, *c) else {
        return 0;
    };
    if v0 < v1 && v1 < v2 {
        1
    } else if v0 > v1 && v1 > v2 {
        -1
    } else {
        0
    }
}

/// Signals for one fund. `window` is its scaled series over the window dates, oldest first.
pub fn compute(
    window: &[Option<f64>],
    today_pct: Option<f64>,
    today_roi: Option<f64>,
    params: TrendParams,
) -> TrendSignals {
    let values: Vec<f64> = window.iter().flatten().copied().collect();
    let min_6m = values.iter().copied().reduce(f64::min);
    let max_6m = values.iter().copied().reduce(f64::max);

    let count_above = values
        .iter()
        .filter(|v| **v >= params.above_threshold)
        .count();
    let count_pct = if values.is_empty() {
        0.0
    } else {
        count_above as f64 / values.len() as f64 * 100.0
    };

    let slope = slope(window);
    let dip_max = today_pct.zip(max_6m).map(|(t, m)| round2(t - m));
    let buy = slope == 1
        && count_pct > params.consistency_cutoff_pct
        && dip_max.is_some_and(|d| d < 0.0);
    let multiplier = dip_max.map(|d| round2(d * count_pct / 100.0));

    TrendSignals {
        min_6m,
        max_6m,
        count_above,
        count_pct,
        today_pct,
        today_roi,
        slope,
        sell: slope == -1,
        dip_max,
        buy,
        multiplier,
    }
}
