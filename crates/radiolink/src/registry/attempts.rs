//! One outstanding connector task per peer address
//!
//! Entries are never removed when a task finishes. A recorded task that has
//! already completed is simply not a blocker, so a fresh attempt can replace
//! it at any time.

use crate::types::PeerAddress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;

/// Registry of connector tasks keyed by peer address
#[derive(Debug, Default)]
pub struct AttemptRegistry {
    attempts: Mutex<HashMap<PeerAddress, JoinHandle<()>>>,
}

impl AttemptRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` for `peer` unless a live task is already recorded.
    ///
    /// The liveness check and the spawn happen under one lock, so two callers
    /// racing for the same peer cannot both launch. When this returns `false`
    /// the task is dropped without being polled.
    pub fn start_if_absent<F>(&self, peer: PeerAddress, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut attempts = self.attempts.lock();
        if let Some(handle) = attempts.get(&peer) {
            if !handle.is_finished() {
                tracing::debug!(peer = %peer, "connection attempt already in flight");
                return false;
            }
        }
        attempts.insert(peer, tokio::spawn(task));
        true
    }

    /// Whether a live task is recorded for `peer`
    pub fn is_running(&self, peer: &PeerAddress) -> bool {
        self.attempts
            .lock()
            .get(peer)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of live tasks
    pub fn running(&self) -> usize {
        self.attempts
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}
