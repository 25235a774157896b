//! Store-backed leases.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::store::FrameStore;

/// An owned lease on a store key.
///
/// Acquired with `SET NX` semantics and a random owner token. Call
/// [`Lease::release`] on every exit path; if the lease is dropped unreleased
/// a best-effort release is spawned on the current runtime, and otherwise
/// the key simply expires.
pub struct Lease {
    store: Arc<dyn FrameStore>,
    key: String,
    token: String,
    ttl: Duration,
    released: bool,
}

impl Lease {
    /// Try to take the lease. `Ok(None)` means another owner holds it.
    pub async fn acquire(
        store: Arc<dyn FrameStore>,
        key: impl Into<String>,
        ttl: Duration,
    ) -> StoreResult<Option<Self>> {
        let key = key.into();
        let token = format!("worker:{}", uuid::Uuid::new_v4());

        if !store.try_acquire_lease(&key, &token, ttl).await? {
            return Ok(None);
        }

        Ok(Some(Self {
            store,
            key,
            token,
            ttl,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Extend the lease. `Ok(false)` means it is now owned by someone else.
    pub async fn renew(&self) -> StoreResult<bool> {
        let owned = self.store.renew_lease(&self.key, &self.token, self.ttl).await?;
        if !owned {
            warn!(lease_key = %self.key, "Lease lost to another owner");
        }
        Ok(owned)
    }

    /// Release the lease if still owned.
    pub async fn release(mut self) -> StoreResult<bool> {
        self.released = true;
        self.store.release_lease(&self.key, &self.token).await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(lease_key = %self.key, "Lease dropped outside runtime; left to expire");
            return;
        };

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = store.release_lease(&key, &token).await {
                warn!(lease_key = %key, "Failed to release dropped lease: {}", e);
            }
        });
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("released", &self.released)
            .finish()
    }
}
