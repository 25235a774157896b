//! Cached multiplexed Redis connection.

use std::sync::atomic::{AtomicU64, Ordering};

use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// One multiplexed connection shared by every caller. It is dropped after an
/// I/O failure and reopened on the next call.
pub(crate) struct SharedConnection {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    opened: AtomicU64,
    label: &'static str,
}

impl SharedConnection {
    pub(crate) fn new(client: redis::Client, label: &'static str) -> Self {
        Self {
            client,
            conn: Mutex::new(None),
            opened: AtomicU64::new(0),
            label,
        }
    }

    pub(crate) fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Connections opened so far, reconnects included.
    pub(crate) fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub(crate) async fn get(&self) -> StoreResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        debug!("Opened Redis {} connection", self.label);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection if the error indicates it is unusable.
    pub(crate) async fn check<T>(&self, result: redis::RedisResult<T>) -> StoreResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = StoreError::from(e);
                if err.is_transient() {
                    warn!("Redis {} connection reset: {}", self.label, err);
                    self.conn.lock().await.take();
                }
                Err(err)
            }
        }
    }
}
