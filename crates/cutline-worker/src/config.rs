//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use cutline_queue::AdmissionConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent encodes allowed across every worker sharing the store
    pub max_slots: usize,
    /// A lease not renewed within this window stops counting
    pub lease_ttl: Duration,
    /// Lease renewal interval
    pub heartbeat_interval: Duration,
    /// Wait before retrying a job that was denied a slot
    pub admission_backoff: Duration,
    /// Idle poll interval when nothing wakes the loop
    pub poll_interval: Duration,
    /// Root for per-job staging directories
    pub work_dir: PathBuf,
    /// How often to sweep for stuck processing jobs
    pub reconcile_interval: Duration,
    /// Processing jobs older than this with no live lease are failed
    pub max_processing: Duration,
    /// Hard limit on a single encode
    pub encode_timeout: Duration,
    /// How long an encoded output is kept after its upload failed
    pub failed_output_retention: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus listener, when set
    pub metrics_addr: Option<SocketAddr>,
}

/// Slots per host when `WORKER_MAX_SLOTS` is not set.
fn default_slots(cpus_per_encode: usize) -> usize {
    (num_cpus::get() / cpus_per_encode.max(1)).max(1)
}

/// Renewal interval that survives one missed tick within the lease TTL.
///
/// Anything at or above half the TTL, or zero, falls back to TTL/3.
fn heartbeat_within_ttl(requested: Duration, lease_ttl: Duration) -> Duration {
    if requested.is_zero() || requested >= lease_ttl / 2 {
        let clamped = lease_ttl / 3;
        warn!(
            requested_ms = requested.as_millis() as u64,
            lease_ttl_ms = lease_ttl.as_millis() as u64,
            heartbeat_ms = clamped.as_millis() as u64,
            "WORKER_HEARTBEAT_SECS must be well under the lease TTL; clamping"
        );
        return clamped;
    }
    requested
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let lease_ttl = Duration::from_secs(30);
        Self {
            max_slots: default_slots(2),
            lease_ttl,
            heartbeat_interval: lease_ttl / 3,
            admission_backoff: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1000),
            work_dir: PathBuf::from("/tmp/cutline"),
            reconcile_interval: Duration::from_secs(60),
            max_processing: Duration::from_secs(7200),
            encode_timeout: Duration::from_secs(7200),
            failed_output_retention: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(60),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cpus_per_encode = env_parse("WORKER_CPUS_PER_ENCODE").unwrap_or(2);
        let lease_ttl = env_parse("WORKER_LEASE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_ttl)
            .max(Duration::from_secs(1));
        let heartbeat_interval = match env_parse("WORKER_HEARTBEAT_SECS") {
            Some(secs) => heartbeat_within_ttl(Duration::from_secs(secs), lease_ttl),
            None => lease_ttl / 3,
        };
        let max_processing = env_parse("WORKER_MAX_PROCESSING_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_processing);

        Self {
            max_slots: env_parse::<usize>("WORKER_MAX_SLOTS")
                .unwrap_or_else(|| default_slots(cpus_per_encode))
                .max(1),
            lease_ttl,
            heartbeat_interval,
            admission_backoff: env_parse("WORKER_ADMISSION_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.admission_backoff),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            reconcile_interval: env_parse("WORKER_RECONCILE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            max_processing,
            encode_timeout: max_processing,
            failed_output_retention: env_parse("WORKER_FAILED_OUTPUT_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.failed_output_retention),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            metrics_addr: env_parse("WORKER_METRICS_ADDR"),
        }
    }

    /// Admission limits derived from this config.
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_slots: self.max_slots,
            lease_ttl: self.lease_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.max_slots >= 1);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert!(config.heartbeat_interval < config.lease_ttl / 2);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/cutline"));
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_default_slots_never_zero() {
        assert!(default_slots(usize::MAX) >= 1);
        assert!(default_slots(0) >= 1);
    }

    #[test]
    fn test_heartbeat_is_clamped_under_ttl() {
        let ttl = Duration::from_secs(30);
        assert_eq!(
            heartbeat_within_ttl(Duration::from_secs(5), ttl),
            Duration::from_secs(5)
        );
        assert_eq!(heartbeat_within_ttl(Duration::from_secs(30), ttl), ttl / 3);
        assert_eq!(heartbeat_within_ttl(Duration::from_secs(60), ttl), ttl / 3);
        assert_eq!(heartbeat_within_ttl(Duration::from_secs(15), ttl), ttl / 3);
        assert_eq!(heartbeat_within_ttl(Duration::ZERO, ttl), ttl / 3);
    }

    #[test]
    fn test_admission_config() {
        let config = WorkerConfig {
            max_slots: 4,
            lease_ttl: Duration::from_secs(12),
            ..Default::default()
        };
        let admission = config.admission_config();
        assert_eq!(admission.max_slots, 4);
        assert_eq!(admission.lease_ttl, Duration::from_secs(12));
    }
}
