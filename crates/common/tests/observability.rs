use metrics_exporter_prometheus::PrometheusBuilder;

#[test]
fn error_events_increment_counter_but_info_does_not() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let (dispatch, guard) = common::observability::build_dispatch("fundtrend-test", "info");
        assert!(guard.is_none(), "OTLP must stay off without an endpoint");

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(date = "2026-01-14", "fetch started");
            tracing::error!(date = "2026-01-14", "fetch failed");
            tracing::error!(date = "2026-01-15", "fetch failed");
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("tracing_error_events 2"),
        "expected two error events, got:\n{rendered}"
    );
}
