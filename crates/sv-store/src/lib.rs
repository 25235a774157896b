//! Shared ephemeral state for the SmartVision pipeline.
//!
//! This crate provides:
//! - A last-value frame store with per-key expiry
//! - Store-backed leases (single active task per camera across workers)
//! - A publish/subscribe alert bus
//!
//! Each capability has a Redis implementation for multi-process deployments
//! and an in-process implementation with the same contract.

pub mod bus;
mod connection;
pub mod error;
pub mod lease;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use bus::{AlertBus, LocalAlertBus, MessageStream, RedisAlertBus};
pub use error::{StoreError, StoreResult};
pub use lease::Lease;
pub use memory::MemoryFrameStore;
pub use redis_store::RedisFrameStore;
pub use store::FrameStore;
