//! One in-flight raw connection per peer address
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` because every operation is a single O(1)
//! check-and-update and the lock is never held across `.await` points.

use crate::types::PeerAddress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry of peer addresses that currently own a raw connection
#[derive(Debug, Default)]
pub struct SocketRegistry {
    reserved: Mutex<HashMap<PeerAddress, u64>>,
    next_token: AtomicU64,
}

impl SocketRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve `peer`.
    ///
    /// Returns `None` when the address is already reserved; the caller must
    /// then close its connection without performing any I/O on it.
    pub fn try_reserve(self: &Arc<Self>, peer: &PeerAddress) -> Option<SocketReservation> {
        let mut reserved = self.reserved.lock();
        if reserved.contains_key(peer) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        reserved.insert(peer.clone(), token);
        Some(SocketReservation {
            registry: Arc::clone(self),
            peer: peer.clone(),
            token,
            released: false,
        })
    }

    /// Whether `peer` currently owns a raw connection
    pub fn is_reserved(&self, peer: &PeerAddress) -> bool {
        self.reserved.lock().contains_key(peer)
    }

    /// Number of reserved addresses
    pub fn len(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Whether no address is reserved
    pub fn is_empty(&self) -> bool {
        self.reserved.lock().is_empty()
    }

    fn release_token(&self, peer: &PeerAddress, token: u64) {
        let mut reserved = self.reserved.lock();
        if reserved.get(peer) == Some(&token) {
            reserved.remove(peer);
        }
    }
}

/// Proof of a successful reservation
///
/// Releasing happens exactly once: through [`release`](Self::release) or on
/// drop, whichever comes first.
pub struct SocketReservation {
    registry: Arc<SocketRegistry>,
    peer: PeerAddress,
    token: u64,
    released: bool,
}

impl SocketReservation {
    /// Reserved peer address
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Release the reservation now
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release_token(&self.peer, self.token);
            tracing::trace!(peer = %self.peer, "socket reservation released");
        }
    }
}

impl Drop for SocketReservation {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for SocketReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketReservation")
            .field("peer", &self.peer)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}
