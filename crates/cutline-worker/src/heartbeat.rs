//! Lease renewal while a job holds an admission slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use cutline_models::JobId;
use cutline_queue::{AdmissionStore, LeaseToken};

use crate::retry::FailureTracker;

/// Background renewal of one lease.
///
/// Started right after a successful acquire. [`Heartbeat::stop`] takes the
/// heartbeat by value, so it can only be stopped once; dropping it without
/// stopping aborts the task.
pub struct Heartbeat {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
}

impl Heartbeat {
    pub fn start(
        admission: Arc<dyn AdmissionStore>,
        token: LeaseToken,
        interval: Duration,
        job_id: JobId,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = FailureTracker::new(3);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                match admission.renew(&token).await {
                    Ok(true) => {
                        failures.record_success();
                        debug!(job_id = %job_id, lease = %token, "Lease renewed");
                    }
                    Ok(false) => {
                        // Expired and possibly handed to another job; renewing
                        // again would not bring it back.
                        lost_flag.store(true, Ordering::SeqCst);
                        warn!(job_id = %job_id, lease = %token, "Admission lease lost before renewal");
                        break;
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(job_id = %job_id, lease = %token, "Lease renewal failed: {}", e);
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            lost,
        }
    }

    /// Whether a renewal found the lease already expired.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stop renewing and wait for the task to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_queue::{AdmissionConfig, MemoryAdmissionStore};

    fn store(ttl: Duration) -> Arc<MemoryAdmissionStore> {
        Arc::new(MemoryAdmissionStore::new(AdmissionConfig {
            max_slots: 1,
            lease_ttl: ttl,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_lease_past_ttl() {
        let admission = store(Duration::from_secs(30));
        let token = admission.acquire().await.unwrap().unwrap();
        let heartbeat = Heartbeat::start(
            admission.clone(),
            token.clone(),
            Duration::from_secs(10),
            JobId::from_string("job-1"),
        );

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        assert!(admission.is_live(token.as_str()).await.unwrap());
        assert!(!heartbeat.is_lost());
        heartbeat.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_heartbeat_lets_lease_expire() {
        let admission = store(Duration::from_secs(30));
        let token = admission.acquire().await.unwrap().unwrap();
        let heartbeat = Heartbeat::start(
            admission.clone(),
            token.clone(),
            Duration::from_secs(10),
            JobId::from_string("job-1"),
        );
        heartbeat.stop().await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!admission.is_live(token.as_str()).await.unwrap());
        assert!(admission.acquire().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reports_lost_lease() {
        let admission = store(Duration::from_secs(5));
        let token = admission.acquire().await.unwrap().unwrap();
        let heartbeat = Heartbeat::start(
            admission.clone(),
            token,
            Duration::from_secs(10),
            JobId::from_string("job-1"),
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(heartbeat.is_lost());
        heartbeat.stop().await;
    }
}
