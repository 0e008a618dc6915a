use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{LockBackend, LockToken};
use crate::engine::EngineError;

const KEY_PREFIX: &str = "parkd:lock:";

/// Delete the key only while it still holds our token.
///
/// KEYS[1] = lock key
/// ARGV[1] = token
const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Lock backend on an external Redis, for multi-instance deployments.
#[derive(Clone)]
pub struct RedisLock {
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisLock {
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let client = redis::Client::open(url)
            .map_err(|e| EngineError::Lock(format!("redis client: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| EngineError::Lock(format!("redis connection manager: {e}")))?;
        info!("redis lock backend connected");
        Ok(Self {
            conn,
            prefix: KEY_PREFIX.to_string(),
        })
    }

    fn key(&self, resource: &str) -> String {
        format!("{}{resource}", self.prefix)
    }
}

#[async_trait]
impl LockBackend for RedisLock {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn try_acquire(
        &self,
        resource: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, EngineError> {
        let mut conn = self.conn.clone();
        // SET key token NX PX ttl replies OK or nil.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(resource))
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::Lock(format!("redis SET NX failed: {e}")))?;
        Ok(reply.is_some())
    }

    async fn release(&self, resource: &str, token: &LockToken) -> Result<bool, EngineError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.key(resource))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EngineError::Lock(format!("redis release script failed: {e}")))?;
        Ok(removed > 0)
    }
}
