//! Coordination store configuration.

use std::time::Duration;

use redis::aio::MultiplexedConnection;

use cutline_models::JobId;

use crate::error::{QueueError, QueueResult};

/// Coordination store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key this service writes
    pub key_prefix: String,
    /// How long terminal job records are kept
    pub job_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "cutline".to_string(),
            job_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("CUTLINE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            job_retention: std::env::var("CUTLINE_JOB_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_retention),
        }
    }

    pub fn keys(&self) -> Keys {
        Keys {
            prefix: self.key_prefix.clone(),
        }
    }
}

/// Admission control limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Maximum concurrent leases across all workers
    pub max_slots: usize,
    /// A lease not renewed within this window is expired
    pub lease_ttl: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_slots: 1,
            lease_ttl: Duration::from_secs(30),
        }
    }
}

/// Key layout in the coordination store.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// FIFO list of pending job ids.
    pub fn queue(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    /// Sorted set of lease tokens scored by last renewal (ms).
    pub fn leases(&self) -> String {
        format!("{}:leases", self.prefix)
    }

    /// Hash holding one job record.
    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Set of job ids currently processing.
    pub fn processing(&self) -> String {
        format!("{}:processing", self.prefix)
    }
}

/// Shared Redis client plus key layout.
#[derive(Clone)]
pub struct RedisHandle {
    client: redis::Client,
    keys: Keys,
}

impl RedisHandle {
    pub fn new(config: &StoreConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self {
            client,
            keys: config.keys(),
        })
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Round-trip check for readiness probes.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys::new("cutline");
        assert_eq!(keys.queue(), "cutline:queue");
        assert_eq!(keys.leases(), "cutline:leases");
        assert_eq!(keys.job(&JobId::from_string("j1")), "cutline:job:j1");
        assert_eq!(keys.processing(), "cutline:processing");
    }
}
