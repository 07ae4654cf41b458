//! Observation dates in scope for one composed table.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};

/// An ordered, duplicate-free set of dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateSet(BTreeSet<NaiveDate>);

impl DateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate) -> bool {
        self.0.insert(date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.0.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dates in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Dates in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Dates on or after `start`.
    #[must_use]
    pub fn since(&self, start: NaiveDate) -> Self {
        Self(self.0.range(start..).copied().collect())
    }

    pub fn ascending(&self) -> Vec<NaiveDate> {
        self.0.iter().copied().collect()
    }

    pub fn descending(&self) -> Vec<NaiveDate> {
        self.0.iter().rev().copied().collect()
    }
}

impl FromIterator<NaiveDate> for DateSet {
    fn from_iter<T: IntoIterator<Item = NaiveDate>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DateSetParams {
    pub window_days: i64,
    pub max_display: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSets {
    pub today: NaiveDate,
    pub window_start: NaiveDate,
    /// Newest first; `today` is always the first entry.
    pub display: Vec<NaiveDate>,
    /// Oldest first; the dates window statistics are computed over.
    pub window: Vec<NaiveDate>,
    /// Oldest first; every date that must be loaded (window plus display).
    pub calc: Vec<NaiveDate>,
}

/// Valid dates are `(significant ∩ in_returns) ∪ {today}`.
///
/// Display keeps `today` plus the most recent `max_display - 1` other valid dates. The
/// window is every valid date on or after `today - window_days`.
pub fn build(
    params: DateSetParams,
    today: NaiveDate,
    in_returns: &DateSet,
    significant: &DateSet,
) -> DateSets {
    let mut valid = significant.intersection(in_returns);
    valid.insert(today);

    let window_start = today
        .checked_sub_days(Days::new(params.window_days.max(0).unsigned_abs()))
        .unwrap_or(NaiveDate::MIN);

    let display: Vec<NaiveDate> = std::iter::once(today)
        .chain(
            valid
                .descending()
                .into_iter()
                .filter(|d| *d != today)
                .take(params.max_display.saturating_sub(1)),
        )
        .collect();

    let window = valid.since(window_start);
    let calc = window.union(&display.iter().copied().collect());

    DateSets {
        today,
        window_start,
        display,
        window: window.ascending(),
        calc: calc.ascending(),
    }
}
