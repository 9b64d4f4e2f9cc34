//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))
}

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "cutline_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "cutline_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "cutline_http_requests_in_flight";

    pub const JOBS_SUBMITTED_TOTAL: &str = "cutline_jobs_submitted_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "cutline_jobs_cancelled_total";
    pub const SUBMISSIONS_REJECTED_TOTAL: &str = "cutline_submissions_rejected_total";
}

const RENDERS_PREFIX: &str = "/api/renders/";

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

/// Timeline rejected by validation.
pub fn record_submission_rejected() {
    counter!(names::SUBMISSIONS_REJECTED_TOTAL).increment(1);
}

/// Collapse job ids so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    match path.strip_prefix(RENDERS_PREFIX) {
        Some(rest) if !rest.is_empty() => match rest.split_once('/') {
            Some((_, tail)) => format!("{}:job_id/{}", RENDERS_PREFIX, tail),
            None => format!("{}:job_id", RENDERS_PREFIX),
        },
        _ => path.to_string(),
    }
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/renders/550e8400-e29b-41d4-a716-446655440000"),
            "/api/renders/:job_id"
        );
        assert_eq!(sanitize_path("/api/renders"), "/api/renders");
        assert_eq!(sanitize_path("/api/renders/"), "/api/renders/");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
