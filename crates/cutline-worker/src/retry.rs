//! Retry with exponential backoff, and log suppression for repeated failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// How an operation is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure; doubles each time.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Name used in log lines.
    pub operation: &'static str,
}

impl RetryPolicy {
    pub fn new(operation: &'static str) -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            operation,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after failed attempt number `failed` (1-based).
    fn delay_after(&self, failed: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the policy's attempts are spent.
///
/// Returns the last error once attempts run out.
pub async fn retry_async<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failed = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                failed += 1;
                if failed >= policy.attempts {
                    warn!(
                        operation = policy.operation,
                        attempts = failed,
                        "Giving up: {}", e
                    );
                    return Err(e);
                }
                let delay = policy.delay_after(failed);
                debug!(
                    operation = policy.operation,
                    attempt = failed,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying: {}", e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Counts consecutive failures of a background task and says when to log.
///
/// The first `max_logged` failures in a row are logged; the rest are
/// suppressed until a success resets the count.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
    max_logged: u32,
}

impl FailureTracker {
    pub fn new(max_logged: u32) -> Self {
        Self {
            consecutive: 0,
            max_logged,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.max_logged {
            debug!(
                failures = self.consecutive,
                "Recovered after suppressed failures"
            );
        }
        self.consecutive = 0;
    }

    /// Returns whether this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive == self.max_logged + 1 {
            warn!(
                "Suppressing further failure logs after {} in a row",
                self.max_logged
            );
        }
        self.consecutive <= self.max_logged
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }
}
