//! Transport-level addressing
//!
//! A [`PeerAddress`] names a physical radio device; it says nothing about the
//! application identity behind it. A [`ServiceId`] names the service we listen
//! on and look for in capability advertisements.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default service UUID advertised by the listening endpoint
pub const DEFAULT_SERVICE_ID: Uuid = Uuid::from_u128(0x185f3df4_3268_4e3f_9fca_d4d5059915bd);

/// Opaque, stable identifier of a radio peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Create a new peer address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerAddress {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

/// Service identifier, matched in both byte orders
///
/// Some radio stacks report advertised service UUIDs with all sixteen bytes
/// reversed, so discovery accepts either form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Wrap a service UUID
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Canonical UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// The same UUID with its byte order reversed
    pub fn byte_reversed(&self) -> Uuid {
        Uuid::from_u128(self.0.as_u128().swap_bytes())
    }

    /// Whether an advertised capability names this service in either encoding
    pub fn matches(&self, advertised: &Uuid) -> bool {
        *advertised == self.0 || *advertised == self.byte_reversed()
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self(DEFAULT_SERVICE_ID)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ServiceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
