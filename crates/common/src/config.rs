use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub fetch: Fetch,
    #[serde(default)]
    pub significance: Significance,
    pub index_feed: IndexFeed,
    #[serde(default)]
    pub analysis: Analysis,
    #[serde(default)]
    pub cache: Cache,
    pub observability: Observability,
    pub web: Option<Web>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fetch {
    pub program: String,
    /// Arguments passed to `program`; `{date}` is replaced with the target date.
    pub args: Vec<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    pub refresh_interval_secs: u64,
    #[serde(default = "default_timezone_offset_minutes")]
    pub timezone_offset_minutes: i32,
}

impl Fetch {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Offset "today" is evaluated in. Falls back to UTC for out-of-range values.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_timezone_offset_minutes() -> i32 {
    330
}

#[derive(Debug, Clone, Deserialize)]
pub struct Significance {
    pub index_name: String,
    pub threshold_pct: f64,
}

impl Default for Significance {
    fn default() -> Self {
        Self {
            index_name: "SENSEX".to_string(),
            threshold_pct: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexFeed {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    pub top_k: usize,
    pub window_days: i64,
    pub display_dates: usize,
    pub page_size: u32,
    pub consistency_cutoff_pct: f64,
    pub above_threshold: f64,
    pub ineligible_categories: Vec<String>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            top_k: 200,
            window_days: 180,
            display_dates: 20,
            page_size: 1000,
            consistency_cutoff_pct: 75.0,
            above_threshold: 50.0,
            ineligible_categories: vec!["Other Scheme - FoF Overseas".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
    pub table_ttl_secs: u64,
    pub significant_ttl_secs: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            table_ttl_secs: 600,
            significant_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Web {
    pub port: u16,
    pub host: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let content = std::fs::read_to_string("config/default.toml")
            .context("read config/default.toml")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
