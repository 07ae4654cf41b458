use anyhow::Result;
use chrono::NaiveDate;
use common::db::{self, AsyncDb};
use common::types::{ChangeType, SignificantMarketChange};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosingPrices {
    pub previous: f64,
    pub current: f64,
}

/// Daily closing prices for a market index. `Ok(None)` means the feed has no bar for `date`.
pub trait IndexFeed {
    fn closing_prices(
        &self,
        index_name: &str,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Option<ClosingPrices>>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    AlreadyRecorded,
    Unavailable,
    BelowThreshold(f64),
    Recorded(SignificantMarketChange),
}

pub fn change_percent(prices: ClosingPrices) -> Option<f64> {
    if prices.previous == 0.0 {
        return None;
    }
    Some((prices.current - prices.previous) / prices.previous * 100.0)
}

/// Records a [`SignificantMarketChange`] for `date` when the index moved at least
/// `threshold_pct` in either direction. Never fails the caller on feed problems.
pub struct SignificantDateDetector<'a, I> {
    pub db: &'a AsyncDb,
    pub feed: &'a I,
    pub index_name: &'a str,
    pub threshold_pct: f64,
}

impl<I: IndexFeed + Sync> SignificantDateDetector<'_, I> {
    pub async fn detect(&self, date: NaiveDate) -> Result<DetectionOutcome> {
        let index = self.index_name.to_string();
        let exists = self
            .db
            .call_named("significance.exists", move |conn| {
                Ok(db::significant_change_exists(conn, &index, date)?)
            })
            .await?;
        if exists {
            tracing::debug!(%date, index = self.index_name, "significant change already recorded");
            return Ok(DetectionOutcome::AlreadyRecorded);
        }

        let prices = match self.feed.closing_prices(self.index_name, date).await {
            Ok(Some(p)) => {
                metrics::counter!("fundtrend_index_feed_requests_total", "status" => "ok")
                    .increment(1);
                p
            }
            Ok(None) => {
                metrics::counter!("fundtrend_index_feed_requests_total", "status" => "no_data")
                    .increment(1);
                tracing::info!(%date, index = self.index_name, "index feed has no data for date");
                return Ok(DetectionOutcome::Unavailable);
            }
            Err(e) => {
                metrics::counter!("fundtrend_index_feed_requests_total", "status" => "error")
                    .increment(1);
                tracing::warn!(%date, index = self.index_name, error = %e, "index feed unavailable");
                return Ok(DetectionOutcome::Unavailable);
            }
        };

        let Some(pct) = change_percent(prices) else {
            return Ok(DetectionOutcome::Unavailable);
        };
        if pct.abs() < self.threshold_pct {
            tracing::debug!(%date, change_percent = pct, "index move below threshold");
            return Ok(DetectionOutcome::BelowThreshold(pct));
        }

        let change = SignificantMarketChange {
            index_name: self.index_name.to_string(),
            change_date: date,
            previous_close: prices.previous,
            current_close: prices.current,
            change_percent: (pct * 100.0).round() / 100.0,
            change_type: ChangeType::from_percent(pct),
        };
        let row = change.clone();
        self.db
            .call_named("significance.upsert", move |conn| {
                db::upsert_significant_change(conn, &row)?;
                Ok(())
            })
            .await?;

        metrics::counter!("fundtrend_significant_changes_recorded_total").increment(1);
        tracing::info!(
            %date,
            index = self.index_name,
            change_percent = change.change_percent,
            change_type = change.change_type.as_str(),
            "significant market change recorded"
        );
        Ok(DetectionOutcome::Recorded(change))
    }
}
