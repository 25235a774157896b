//! Frame store contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Shared last-value cache with per-key expiry.
///
/// Last write wins per key and reads never block on writes. A reader may
/// observe the same value twice or miss one entirely; the only guarantee is
/// the freshest value as of the read.
///
/// Leases live in the same key space. Renew and release only succeed when
/// the stored token matches the caller's.
#[async_trait]
pub trait FrameStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Current value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Remaining time to live. `None` if absent, expired, or stored without expiry.
    async fn ttl_remaining(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Set `key` to `token` only if it does not exist.
    async fn try_acquire_lease(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool>;

    /// Extend the lease if still owned by `token`.
    async fn renew_lease(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete the lease if still owned by `token`.
    async fn release_lease(&self, key: &str, token: &str) -> StoreResult<bool>;
}
