//! Lease-guarded task start.

use tokio::task::JoinHandle;

/// Result of starting a per-camera task.
#[derive(Debug)]
pub enum StartOutcome<T> {
    /// This worker took the lease and spawned the task
    Started(JoinHandle<T>),
    /// Another owner holds the lease; nothing was spawned
    AlreadyRunning,
}

impl<T> StartOutcome<T> {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }

    pub fn into_handle(self) -> Option<JoinHandle<T>> {
        match self {
            StartOutcome::Started(handle) => Some(handle),
            StartOutcome::AlreadyRunning => None,
        }
    }
}
