use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Upstream simulado API
    pub static ref UPSTREAM_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "upstream_requests_total",
        "Total number of requests made to the simulado API",
        &["endpoint", "status"]
    )
    .unwrap();

    pub static ref UPSTREAM_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "upstream_request_duration_seconds",
        "Simulado API request duration in seconds",
        &["endpoint"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    // Exam Metrics
    pub static ref EXAM_NAVIGATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_navigations_total",
        "Question navigations by kind and result",
        &["kind", "result"]
    )
    .unwrap();

    pub static ref SKIP_TOGGLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_skip_toggles_total",
        "Skip toggle requests by result",
        &["result"]
    )
    .unwrap();

    pub static ref BLOCK_FINALIZATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_block_finalizations_total",
        "Block finalization attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref EXAM_TERMINATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_terminations_total",
        "Exam terminations by reason",
        &["reason"]
    )
    .unwrap();

    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_submissions_total",
        "Result submissions by status",
        &["status"]
    )
    .unwrap();

    pub static ref TIMER_ALERTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_timer_alerts_total",
        "Timer alerts emitted by kind",
        &["kind"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "exam_sessions_active",
        "1 while an exam is in progress"
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track an upstream call with count + latency metrics
pub async fn track_upstream_call<F, T>(endpoint: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    UPSTREAM_REQUESTS_TOTAL
        .with_label_values(&[endpoint, status])
        .inc();

    UPSTREAM_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        SKIP_TOGGLES_TOTAL.with_label_values(&["skipped"]).inc();
        EXAM_TERMINATIONS_TOTAL
            .with_label_values(&["time_expired"])
            .inc();

        let rendered = render_metrics().unwrap();
        assert!(rendered.contains("exam_skip_toggles_total"));
        assert!(rendered.contains("exam_terminations_total"));
    }

    #[tokio::test]
    async fn track_upstream_call_passes_result_through() {
        let ok: Result<u8, anyhow::Error> = track_upstream_call("current", async { Ok(5) }).await;
        assert_eq!(ok.unwrap(), 5);

        let err: Result<u8, anyhow::Error> =
            track_upstream_call("current", async { Err(anyhow::anyhow!("down")) }).await;
        assert!(err.is_err());
        assert!(
            UPSTREAM_REQUESTS_TOTAL
                .with_label_values(&["current", "error"])
                .get()
                >= 1
        );
    }
}
