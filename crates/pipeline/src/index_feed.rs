use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Days, FixedOffset, NaiveDate, TimeZone};
use reqwest::Url;
use serde::Deserialize;

use crate::significance::{ClosingPrices, IndexFeed};

/// Yahoo-style chart API client (`/v8/finance/chart/{ticker}`).
pub struct ChartIndexFeed {
    base_url: String,
    client: reqwest::Client,
    offset: FixedOffset,
}

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

/// Chart ticker for an index name. Unknown names are passed through as tickers.
pub fn ticker_for(index_name: &str) -> &str {
    match index_name {
        "SENSEX" => "^BSESN",
        "NIFTY50" | "NIFTY" => "^NSEI",
        other => other,
    }
}

impl ChartIndexFeed {
    pub fn new(base_url: &str, timeout: Duration, offset: FixedOffset) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; fundtrend/0.1)")
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            offset,
        })
    }

    pub fn from_config(cfg: &common::config::Config) -> Result<Self> {
        Self::new(
            &cfg.index_feed.base_url,
            Duration::from_secs(cfg.index_feed.timeout_secs),
            cfg.fetch.offset(),
        )
    }

    /// Window of daily bars from ten days before `date` through the end of `date`,
    /// enough to find a previous close across weekends and holidays.
    pub fn chart_url(&self, index_name: &str, date: NaiveDate) -> Result<String> {
        let ticker = urlencoding::encode(ticker_for(index_name));
        let mut url = Url::parse(&format!("{}/v8/finance/chart/{ticker}", self.base_url))?;
        let start = date.checked_sub_days(Days::new(10)).unwrap_or(date);
        let end = date.checked_add_days(Days::new(1)).unwrap_or(date);
        url.query_pairs_mut()
            .append_pair("period1", &self.midnight_ts(start).to_string())
            .append_pair("period2", &self.midnight_ts(end).to_string())
            .append_pair("interval", "1d");
        Ok(url.to_string())
    }

    fn midnight_ts(&self, date: NaiveDate) -> i64 {
        self.offset
            .from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
            .single()
            .map_or(0, |dt| dt.timestamp())
    }

    /// (date, close) pairs with bar timestamps converted into the configured offset.
    pub fn daily_closes(&self, resp: &ChartResponse) -> Vec<(NaiveDate, f64)> {
        let Some(result) = resp.chart.result.as_ref().and_then(|r| r.first()) else {
            return Vec::new();
        };
        let Some(quote) = result.indicators.quote.first() else {
            return Vec::new();
        };
        result
            .timestamp
            .iter()
            .zip(&quote.close)
            .filter_map(|(ts, close)| {
                let close = (*close)?;
                let dt = self.offset.timestamp_opt(*ts, 0).single()?;
                Some((dt.date_naive(), close))
            })
            .collect()
    }
}

/// Close on `date` and the latest earlier close. `None` if either is missing.
pub fn pick_closing_prices(bars: &[(NaiveDate, f64)], date: NaiveDate) -> Option<ClosingPrices> {
    let current = bars.iter().rev().find(|(d, _)| *d == date)?.1;
    let previous = bars
        .iter()
        .filter(|(d, _)| *d < date)
        .max_by_key(|(d, _)| *d)?
        .1;
    Some(ClosingPrices { previous, current })
}

impl IndexFeed for ChartIndexFeed {
    async fn closing_prices(
        &self,
        index_name: &str,
        date: NaiveDate,
    ) -> Result<Option<ClosingPrices>> {
        let url = self.chart_url(index_name, date)?;
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("index feed returned HTTP {}", resp.status());
        }
        let body: ChartResponse = resp.json().await.context("decode chart response")?;
        Ok(pick_closing_prices(&self.daily_closes(&body), date))
    }
}
