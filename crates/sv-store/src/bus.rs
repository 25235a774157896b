//! Publish/subscribe alert bus.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::debug;

use crate::connection::SharedConnection;
use crate::error::{StoreError, StoreResult};

/// Stream of raw message payloads for one channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Named-channel fan-out.
#[async_trait]
pub trait AlertBus: Send + Sync {
    /// Publish `payload` on `channel`; returns the number of receivers.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize>;

    /// Subscribe to `channel`. Only messages published afterwards are delivered.
    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream>;
}

/// Redis pub/sub bus.
///
/// Publishes share one cached connection; each subscription opens its own
/// pub/sub connection.
pub struct RedisAlertBus {
    conn: SharedConnection,
}

impl RedisAlertBus {
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            conn: SharedConnection::new(client, "alert bus"),
        })
    }

    /// Publish connections opened so far, reconnects included.
    pub fn connections_opened(&self) -> u64 {
        self.conn.opened()
    }
}

#[async_trait]
impl AlertBus for RedisAlertBus {
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
        let mut conn = self.conn.get().await?;

        debug!("Publishing alert to {}", channel);
        let result: redis::RedisResult<usize> = conn.publish(channel, payload).await;

        self.conn.check(result).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        let mut pubsub = self.conn.client().get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });

        Ok(Box::pin(stream))
    }
}

const LOCAL_CHANNEL_CAPACITY: usize = 256;

/// In-process broadcast bus.
///
/// Slow subscribers skip messages they lagged behind on rather than blocking
/// publishers.
#[derive(Default)]
pub struct LocalAlertBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalAlertBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(LOCAL_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl AlertBus for LocalAlertBus {
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
        let sender = self.sender(channel);
        // No subscribers is not an error, same as Redis PUBLISH returning 0.
        Ok(sender.send(payload.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        let receiver = self.sender(channel).subscribe();

        let stream = futures_util::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "Local bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

impl LocalAlertBus {
    /// Drop a channel, ending every open subscription on it.
    pub fn close(&self, channel: &str) -> StoreResult<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .remove(channel)
            .map(|_| ())
            .ok_or_else(|| StoreError::BusClosed(channel.to_string()))
    }
}
