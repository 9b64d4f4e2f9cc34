//! Worker metrics.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "cutline_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "cutline_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "cutline_jobs_failed_total";
    pub const JOBS_RECONCILED_TOTAL: &str = "cutline_jobs_reconciled_total";
    pub const ADMISSION_DENIED_TOTAL: &str = "cutline_admission_denied_total";
    pub const LEASES_HELD: &str = "cutline_leases_held";
    pub const ENCODE_DURATION_SECONDS: &str = "cutline_encode_duration_seconds";
    pub const UPLOAD_DURATION_SECONDS: &str = "cutline_upload_duration_seconds";
    pub const STAGE_DURATION_SECONDS: &str = "cutline_stage_duration_seconds";
}

/// Serve Prometheus metrics on `addr`.
pub fn install_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(kind: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_job_reconciled() {
    counter!(names::JOBS_RECONCILED_TOTAL).increment(1);
}

pub fn record_admission_denied() {
    counter!(names::ADMISSION_DENIED_TOTAL).increment(1);
}

/// Leases held by this worker.
pub fn set_leases_held(count: usize) {
    gauge!(names::LEASES_HELD).set(count as f64);
}

pub fn record_stage_duration(duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_encode_duration(duration_secs: f64) {
    histogram!(names::ENCODE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_upload_duration(duration_secs: f64) {
    histogram!(names::UPLOAD_DURATION_SECONDS).record(duration_secs);
}
