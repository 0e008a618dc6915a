use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{LockBackend, LockToken};
use crate::clock::now_ms;
use crate::engine::EngineError;
use crate::model::Ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub resource_id: String,
    pub token: LockToken,
    pub acquired_at: Ms,
    pub expires_at: Ms,
}

impl LockRecord {
    fn is_live(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

/// Lock records keyed by resource. The key is the uniqueness constraint;
/// `expires_at` makes an abandoned record reclaimable.
///
/// Expiry runs on wall time, not the engine clock: a holder's TTL is real.
#[derive(Debug, Default)]
pub struct LockTable {
    records: DashMap<String, LockRecord>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, resource: &str) -> Option<LockRecord> {
        let now = now_ms();
        self.records
            .get(resource)
            .filter(|r| r.is_live(now))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records whose holder is gone. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let before = self.records.len();
        self.records.retain(|_, r| r.is_live(now));
        before.saturating_sub(self.records.len())
    }

    fn insert_if_free(&self, resource: &str, token: &LockToken, ttl: Duration) -> bool {
        let now = now_ms();
        let record = LockRecord {
            resource_id: resource.to_string(),
            token: *token,
            acquired_at: now,
            expires_at: now + ttl.as_millis() as Ms,
        };
        match self.records.entry(resource.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_live(now) {
                    return false;
                }
                held.insert(record);
                true
            }
            Entry::Vacant(free) => {
                free.insert(record);
                true
            }
        }
    }

    fn remove_if_held(&self, resource: &str, token: &LockToken) -> bool {
        let now = now_ms();
        self.records
            .remove_if(resource, |_, r| r.token == *token)
            .is_some_and(|(_, r)| r.is_live(now))
    }
}

/// Lock backend on the engine's own lock table. Single-process only.
#[derive(Debug, Clone)]
pub struct StoreLock {
    table: Arc<LockTable>,
}

impl StoreLock {
    pub fn new(table: Arc<LockTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl LockBackend for StoreLock {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn try_acquire(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, EngineError> {
        Ok(self.table.insert_if_free(resource, token, ttl))
    }

    async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, EngineError> {
        Ok(self.table.remove_if_held(resource, token))
    }
}
