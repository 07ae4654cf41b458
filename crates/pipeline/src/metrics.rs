use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "fundtrend_fetch_runs_total",
        "Fetch attempts by status (ok, timeout, failed)."
    );
    describe_histogram!(
        "fundtrend_fetch_latency_ms",
        "Wall-clock time of one fetch including upserts."
    );
    describe_counter!(
        "fundtrend_rows_upserted_total",
        "Return rows written by the fetch orchestrator."
    );
    describe_counter!(
        "fundtrend_significant_changes_recorded_total",
        "Significant index moves recorded."
    );
    describe_counter!(
        "fundtrend_index_feed_requests_total",
        "Index feed requests by status."
    );
    describe_counter!("fundtrend_cache_hits_total", "Cache reads served without recompute.");
    describe_counter!("fundtrend_cache_misses_total", "Cache reads that recomputed.");
    describe_counter!(
        "fundtrend_cache_refresh_failures_total",
        "Recomputes that failed; the last good snapshot was served if present."
    );
    describe_histogram!(
        "fundtrend_compute_latency_ms",
        "Time to compose the trend table."
    );
    describe_gauge!(
        "fundtrend_universe_size",
        "Funds in the last composed universe."
    );
}

/// Install the global recorder and serve `/metrics` on `port`.
pub fn install_prometheus(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}
