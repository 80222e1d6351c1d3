//! Unified error system for link establishment
//!
//! Every failure the link provider can produce is a [`LinkError`]. Callers that
//! only need to classify a failure use [`LinkError::kind`] rather than matching
//! on messages.

use serde::{Deserialize, Serialize};

/// Coarse classification of a [`LinkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Listen/accept/connect/read/write failure at the transport level
    Transport,
    /// Malformed or wrong-kind payload
    Protocol,
    /// Certificate missing or rejected by the verifier
    Authentication,
    /// A link was submitted for admission twice
    DuplicateAdmission,
    /// Lost a race for a peer address reservation
    ReservationConflict,
    /// Invalid configuration
    Config,
}

/// Unified error type for all link provider operations
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum LinkError {
    /// Transport-level I/O failure
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport failure
        message: String,
    },

    /// Malformed or unexpected payload
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message describing the protocol violation
        message: String,
    },

    /// Peer could not be authenticated
    #[error("Authentication error: {message}")]
    Authentication {
        /// Error message describing the authentication failure
        message: String,
    },

    /// The same link instance was admitted twice
    #[error("Duplicate admission of link {link_id} for device {device_id}")]
    DuplicateAdmission {
        /// Device identity the link is bound to
        device_id: String,
        /// Instance identifier of the resubmitted link
        link_id: u64,
    },

    /// Another connection already holds the peer address
    #[error("Reservation conflict for peer {peer}")]
    ReservationConflict {
        /// Transport address that was already reserved
        peer: String,
    },

    /// Configuration failed to load or validate
    #[error("Config error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl LinkError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a reservation conflict error
    pub fn reservation_conflict(peer: impl std::fmt::Display) -> Self {
        Self::ReservationConflict {
            peer: peer.to_string(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::DuplicateAdmission { .. } => ErrorKind::DuplicateAdmission,
            Self::ReservationConflict { .. } => ErrorKind::ReservationConflict,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Expected under normal races; dropped without a warning
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::ReservationConflict { .. })
    }
}

/// Standard Result type for link provider operations
pub type LinkResult<T> = std::result::Result<T, LinkError>;

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(format!("malformed packet: {err}"))
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
