//! Redis-backed frame store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tracing::debug;

use crate::connection::SharedConnection;
use crate::error::StoreResult;
use crate::store::FrameStore;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Frame store shared across worker processes through Redis.
pub struct RedisFrameStore {
    conn: SharedConnection,
    renew_script: Script,
    release_script: Script,
}

impl RedisFrameStore {
    /// Create a store for the given Redis URL. Connects lazily.
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            conn: SharedConnection::new(client, "frame store"),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        self.conn.get().await
    }

    async fn check<T>(&self, result: redis::RedisResult<T>) -> StoreResult<T> {
        self.conn.check(result).await
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl FrameStore for RedisFrameStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await;
        self.check(result).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<Vec<u8>>> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;
        self.check(result).await
    }

    async fn ttl_remaining(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> =
            redis::cmd("PTTL").arg(key).query_async(&mut conn).await;
        let pttl = self.check(result).await?;

        // -2: missing, -1: no expiry
        Ok((pttl > 0).then(|| Duration::from_millis(pttl as u64)))
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await;
        let acquired = self.check(result).await?.is_some();

        debug!(lease_key = %key, acquired = acquired, "Lease acquisition attempt");
        Ok(acquired)
    }

    async fn renew_lease(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i32> = self
            .renew_script
            .key(key)
            .arg(token)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await;
        Ok(self.check(result).await? == 1)
    }

    async fn release_lease(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i32> = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await;
        let released = self.check(result).await? == 1;

        debug!(lease_key = %key, released = released, "Lease released");
        Ok(released)
    }
}
