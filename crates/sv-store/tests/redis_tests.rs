//! Redis frame store and bus integration tests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sv_store::{AlertBus, FrameStore, Lease, RedisAlertBus, RedisFrameStore};

fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_key(prefix: &str) -> String {
    format!("test:{}:{}", prefix, uuid::Uuid::new_v4())
}

/// Binary payloads survive the round trip and expire.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_frame_set_get_expire() {
    let store = RedisFrameStore::new(&redis_url()).expect("Failed to create store");
    let key = unique_key("frame");
    let jpeg = [0xFFu8, 0xD8, 0x00, 0x01, 0xFF, 0xD9];

    store
        .set(&key, &jpeg, Duration::from_millis(300))
        .await
        .expect("SET failed");
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(&jpeg[..]));
    assert!(store.ttl_remaining(&key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(store.get(&key).await.unwrap().is_none());
    assert!(store.ttl_remaining(&key).await.unwrap().is_none());
}

/// Only one of two concurrent acquirers wins.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_lease_single_owner() {
    let store: Arc<dyn FrameStore> =
        Arc::new(RedisFrameStore::new(&redis_url()).expect("Failed to create store"));
    let key = unique_key("lease");
    let ttl = Duration::from_secs(5);

    let (a, b) = tokio::join!(
        Lease::acquire(store.clone(), key.clone(), ttl),
        Lease::acquire(store.clone(), key.clone(), ttl)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.is_some() ^ b.is_some());

    let lease = a.or(b).unwrap();
    assert!(lease.renew().await.unwrap());
    assert!(!store.renew_lease(&key, "someone-else", ttl).await.unwrap());
    assert!(lease.release().await.unwrap());
}

/// Messages published after subscribing are delivered.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_pubsub_delivery() {
    let bus = RedisAlertBus::new(&redis_url()).expect("Failed to create bus");
    let channel = unique_key("channel");

    let mut sub = bus.subscribe(&channel).await.expect("subscribe failed");
    let receivers = bus.publish(&channel, "{\"type\":\"system\"}").await.unwrap();
    assert_eq!(receivers, 1);

    let msg = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out");
    assert_eq!(msg.as_deref(), Some("{\"type\":\"system\"}"));
}

/// A burst of publishes reuses one connection and delivers every message.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publishes_share_one_connection() {
    let bus = RedisAlertBus::new(&redis_url()).expect("Failed to create bus");
    let channel = unique_key("live");

    let mut sub = bus.subscribe(&channel).await.expect("subscribe failed");
    for i in 0..50 {
        let receivers = bus.publish(&channel, &i.to_string()).await.unwrap();
        assert_eq!(receivers, 1);
    }
    assert_eq!(bus.connections_opened(), 1);

    let received: Vec<String> =
        tokio::time::timeout(Duration::from_secs(2), sub.by_ref().take(50).collect())
            .await
            .expect("timed out");
    let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
    assert_eq!(received, expected);
}
