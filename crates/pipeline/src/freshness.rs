//! Decides whether the stored returns are current for "today".

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub latest: Option<NaiveDate>,
    pub today: NaiveDate,
    pub fetch_needed: bool,
}

/// Calendar date of `now` in the given offset.
pub fn today_in(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Fetch is needed unless the latest stored date equals today. Empty storage always needs one.
pub fn check(latest: Option<NaiveDate>, today: NaiveDate) -> Freshness {
    Freshness {
        latest,
        today,
        fetch_needed: latest != Some(today),
    }
}
