//! Admission control: a cap on concurrent encodes shared by every worker.
//!
//! A lease is a token plus the time it was last renewed. Leases not renewed
//! within the TTL stop counting, so capacity held by a crashed worker comes
//! back without intervention.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use redis::Script;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::{AdmissionConfig, RedisHandle};
use crate::error::QueueResult;

/// One unit of encode concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease store shared by all schedulers.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Atomically drop expired leases and, if fewer than the maximum remain,
    /// take a new one. `None` means denied.
    async fn acquire(&self) -> QueueResult<Option<LeaseToken>>;

    /// Refresh a lease. Returns `false` when the lease already expired; the
    /// holder has lost its slot.
    async fn renew(&self, token: &LeaseToken) -> QueueResult<bool>;

    /// Drop a lease. Releasing an unknown or expired token succeeds.
    async fn release(&self, token: &LeaseToken) -> QueueResult<()>;

    /// Number of unexpired leases.
    async fn count(&self) -> QueueResult<usize>;

    /// Whether `token` names an unexpired lease.
    async fn is_live(&self, token: &str) -> QueueResult<bool>;

    fn config(&self) -> AdmissionConfig;
}

/// In-process lease store for single-node deployments and tests.
pub struct MemoryAdmissionStore {
    config: AdmissionConfig,
    leases: Mutex<HashMap<String, Instant>>,
}

impl MemoryAdmissionStore {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, leases: &mut HashMap<String, Instant>, now: Instant) {
        let ttl = self.config.lease_ttl;
        leases.retain(|_, renewed| now.duration_since(*renewed) < ttl);
    }
}

#[async_trait]
impl AdmissionStore for MemoryAdmissionStore {
    async fn acquire(&self) -> QueueResult<Option<LeaseToken>> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        self.prune(&mut leases, now);

        if leases.len() >= self.config.max_slots {
            return Ok(None);
        }
        let token = LeaseToken::generate();
        leases.insert(token.as_str().to_string(), now);
        Ok(Some(token))
    }

    async fn renew(&self, token: &LeaseToken) -> QueueResult<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();
        self.prune(&mut leases, now);

        match leases.get_mut(token.as_str()) {
            Some(renewed) => {
                *renewed = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, token: &LeaseToken) -> QueueResult<()> {
        self.leases.lock().await.remove(token.as_str());
        Ok(())
    }

    async fn count(&self) -> QueueResult<usize> {
        let leases = self.leases.lock().await;
        let now = Instant::now();
        let ttl = self.config.lease_ttl;
        Ok(leases
            .values()
            .filter(|renewed| now.duration_since(**renewed) < ttl)
            .count())
    }

    async fn is_live(&self, token: &str) -> QueueResult<bool> {
        let leases = self.leases.lock().await;
        Ok(leases
            .get(token)
            .is_some_and(|renewed| renewed.elapsed() < self.config.lease_ttl))
    }

    fn config(&self) -> AdmissionConfig {
        self.config
    }
}

// Lease scores are milliseconds of the Redis server clock, so workers with
// skewed clocks still agree on expiry.
const NOW_MS: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
"#;

const ACQUIRE_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - ttl)
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[2]) then
    redis.call('ZADD', KEYS[1], now, ARGV[3])
    return 1
end
return 0
"#;

const RENEW_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
local score = redis.call('ZSCORE', KEYS[1], ARGV[2])
if not score or tonumber(score) <= now - ttl then
    redis.call('ZREM', KEYS[1], ARGV[2])
    return 0
end
redis.call('ZADD', KEYS[1], 'XX', now, ARGV[2])
return 1
"#;

const COUNT_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
return redis.call('ZCOUNT', KEYS[1], '(' .. (now - ttl), '+inf')
"#;

const IS_LIVE_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
local score = redis.call('ZSCORE', KEYS[1], ARGV[2])
if score and tonumber(score) > now - ttl then
    return 1
end
return 0
"#;

fn clocked(body: &str) -> Script {
    Script::new(&format!("{}{}", NOW_MS, body))
}

/// Lease store on a Redis sorted set, with scripted prune-and-insert.
pub struct RedisAdmissionStore {
    redis: RedisHandle,
    config: AdmissionConfig,
    acquire: Script,
    renew: Script,
    count: Script,
    is_live: Script,
}

impl RedisAdmissionStore {
    pub fn new(redis: RedisHandle, config: AdmissionConfig) -> Self {
        Self {
            redis,
            config,
            acquire: clocked(ACQUIRE_SCRIPT),
            renew: clocked(RENEW_SCRIPT),
            count: clocked(COUNT_SCRIPT),
            is_live: clocked(IS_LIVE_SCRIPT),
        }
    }

    fn ttl_ms(&self) -> u64 {
        self.config.lease_ttl.as_millis() as u64
    }
}

#[async_trait]
impl AdmissionStore for RedisAdmissionStore {
    async fn acquire(&self) -> QueueResult<Option<LeaseToken>> {
        let mut conn = self.redis.conn().await?;
        let token = LeaseToken::generate();

        let granted: i32 = self
            .acquire
            .key(self.redis.keys().leases())
            .arg(self.ttl_ms())
            .arg(self.config.max_slots)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;

        if granted == 1 {
            debug!(lease = %token, "Admission lease granted");
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    async fn renew(&self, token: &LeaseToken) -> QueueResult<bool> {
        let mut conn = self.redis.conn().await?;
        let renewed: i32 = self
            .renew
            .key(self.redis.keys().leases())
            .arg(self.ttl_ms())
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(&self, token: &LeaseToken) -> QueueResult<()> {
        let mut conn = self.redis.conn().await?;
        redis::cmd("ZREM")
            .arg(self.redis.keys().leases())
            .arg(token.as_str())
            .query_async::<i32>(&mut conn)
            .await?;
        debug!(lease = %token, "Admission lease released");
        Ok(())
    }

    async fn count(&self) -> QueueResult<usize> {
        let mut conn = self.redis.conn().await?;
        let count: usize = self
            .count
            .key(self.redis.keys().leases())
            .arg(self.ttl_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn is_live(&self, token: &str) -> QueueResult<bool> {
        let mut conn = self.redis.conn().await?;
        let live: i32 = self
            .is_live
            .key(self.redis.keys().leases())
            .arg(self.ttl_ms())
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(live == 1)
    }

    fn config(&self) -> AdmissionConfig {
        self.config
    }
}
