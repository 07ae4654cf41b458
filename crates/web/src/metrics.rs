use anyhow::Result;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn describe() {
    describe_gauge!(
        "fundtrend_web_build_info",
        "Build info for the fundtrend web API (value is always 1)."
    );
    describe_counter!(
        "fundtrend_web_api_errors_total",
        "API responses with a 4xx/5xx status, by route and status."
    );
    pipeline::metrics::describe();
}

/// Install the global Prometheus recorder once and return a handle for rendering `/metrics`.
///
/// `install_recorder` leaves upkeep to the caller; `/metrics` runs it on each scrape.
pub fn init_global() -> Result<PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }
    describe();
    let handle = PrometheusBuilder::new().install_recorder()?;
    let handle = PROM_HANDLE.get_or_init(|| handle);

    let git_sha = std::env::var("GIT_SHA").unwrap_or_else(|_| "unknown".to_string());
    ::metrics::gauge!(
        "fundtrend_web_build_info",
        "version" => env!("CARGO_PKG_VERSION"),
        "git_sha" => git_sha,
    )
    .set(1.0);

    Ok(handle.clone())
}
