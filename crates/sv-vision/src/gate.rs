//! Live-view publish gate.

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Suppresses re-publishing identical annotated frames.
///
/// A frame passes when its content hash differs from the last published one,
/// or when at least `min_interval` has elapsed since the last publish.
#[derive(Debug)]
pub struct PublishGate {
    min_interval: Duration,
    last_hash: Option<[u8; 32]>,
    last_published: Option<Instant>,
}

impl PublishGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_hash: None,
            last_published: None,
        }
    }

    /// Decide whether `frame` should be published now, recording it if so.
    pub fn should_publish(&mut self, frame: &[u8]) -> bool {
        self.should_publish_at(frame, Instant::now())
    }

    fn should_publish_at(&mut self, frame: &[u8], now: Instant) -> bool {
        let hash: [u8; 32] = Sha256::digest(frame).into();

        let changed = self.last_hash != Some(hash);
        let stale = self
            .last_published
            .map_or(true, |at| now.duration_since(at) >= self.min_interval);

        if changed || stale {
            self.last_hash = Some(hash);
            self.last_published = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for PublishGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_frame_is_held_back() {
        let mut gate = PublishGate::default();
        let t0 = Instant::now();

        assert!(gate.should_publish_at(b"frame-a", t0));
        assert!(!gate.should_publish_at(b"frame-a", t0 + Duration::from_millis(300)));
        assert!(gate.should_publish_at(b"frame-a", t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn test_changed_frame_passes_immediately() {
        let mut gate = PublishGate::default();
        let t0 = Instant::now();

        assert!(gate.should_publish_at(b"frame-a", t0));
        assert!(gate.should_publish_at(b"frame-b", t0 + Duration::from_millis(10)));
    }
}
