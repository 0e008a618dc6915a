//! Named, time-bounded mutual exclusion across service instances.
//!
//! A [`LockBackend`] only knows how to try once and how to release by token.
//! [`LockManager`] layers bounded waiting with exponential backoff and the
//! scoped `with_lock` helper on top, so both backends share one contract.

mod redis;
mod store;

pub use self::redis::RedisLock;
pub use self::store::{LockRecord, LockTable, StoreLock};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::{LOCK_BACKOFF_INITIAL_MS, LOCK_BACKOFF_MAX_MS};

/// Opaque proof of holding a lock. Unique per acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Ulid);

impl LockToken {
    pub fn generate() -> Self {
        LockToken(Ulid::new())
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
pub trait LockBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Set-if-absent with expiry. `Ok(false)` while another live holder exists.
    async fn try_acquire(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, EngineError>;

    /// Delete only if `token` is still the holder.
    async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, EngineError>;
}

/// Doubling delay between attempts, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(LOCK_BACKOFF_INITIAL_MS),
            Duration::from_millis(LOCK_BACKOFF_MAX_MS),
        )
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

pub fn spot_resource(spot_id: &Ulid) -> String {
    format!("spot:{spot_id}")
}

pub fn user_resource(user_id: &Ulid) -> String {
    format!("user:{user_id}")
}

#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Retry with backoff until `max_wait` elapses, then `LockTimeout`.
    pub async fn acquire(&self, resource: &str, max_wait: Duration) -> Result<LockToken, EngineError> {
        let token = LockToken::generate();
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut backoff = Backoff::default();

        loop {
            if self.backend.try_acquire(resource, &token, self.ttl).await? {
                metrics::histogram!(
                    crate::observability::LOCK_WAIT_SECONDS,
                    "backend" => self.backend.name()
                )
                .record(started.elapsed().as_secs_f64());
                debug!("acquired {} lock on {resource} ({token})", self.backend.name());
                return Ok(token);
            }
            let now = Instant::now();
            if now >= deadline {
                metrics::counter!(
                    crate::observability::LOCK_TIMEOUTS_TOTAL,
                    "backend" => self.backend.name()
                )
                .increment(1);
                warn!("gave up on lock {resource} after {max_wait:?}");
                return Err(EngineError::LockTimeout(resource.to_string()));
            }
            let delay = backoff.next_delay().min(deadline - now);
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, EngineError> {
        let released = self.backend.release(resource, token).await?;
        if released {
            debug!("released lock on {resource} ({token})");
        } else {
            warn!("lock on {resource} was no longer held by {token}");
        }
        Ok(released)
    }

    /// Run `f` while holding `resource`. The lock is released whatever `f` returns.
    pub async fn with_lock<T, F, Fut>(
        &self,
        resource: &str,
        max_wait: Duration,
        f: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let token = self.acquire(resource, max_wait).await?;
        let result = f().await;
        if let Err(e) = self.release(resource, &token).await {
            // Expiry frees it anyway; don't mask the operation's own result.
            warn!("failed to release lock on {resource}: {e}");
        }
        result
    }
}
