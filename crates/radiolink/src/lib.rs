//! # Radiolink - Short-Range Radio Link Provider
//!
//! Discovers peer devices over a short-range radio transport, authenticates
//! them with a one-packet identity exchange, and keeps exactly one live link
//! per peer device for the layer above.
//!
//! ## Components
//!
//! - [`acceptor`]: listens for inbound connections (acceptor role)
//! - [`discovery`]: finds paired peers that advertise our service
//! - [`connector`]: dials a single peer (connector role)
//! - [`handshake`]: the role-asymmetric identity exchange
//! - [`registry`]: one raw connection and one outbound attempt per address
//! - [`registrar`]: one link per device, newest wins
//! - [`provider`]: start/stop lifecycle tying it together
//!
//! ## Collaborators
//!
//! The radio itself, stream multiplexing, certificate checks, and the upper
//! layer are traits in [`core`]. [`core::implementations::memory`] provides an
//! in-memory radio for tests and simulations.
//!
//! ## Invariants
//!
//! - At most one raw connection per peer address at any instant
//! - At most one outbound attempt per peer address at any instant
//! - At most one registered link per device; a replacement is established
//!   before the link it replaces is reported lost

#![forbid(unsafe_code)]

// =============================================================================
// MODULES
// =============================================================================

/// Inbound connection handling
pub mod acceptor;

/// Provider configuration
pub mod config;

/// Outbound connection attempts
pub mod connector;

/// Transport boundary traits and the in-memory radio
pub mod core;

/// Discovery passes over paired peers
pub mod discovery;

/// Unified error handling
pub mod error;

/// Identity handshake
pub mod handshake;

/// Established links
pub mod link;

/// Lifecycle owner
pub mod provider;

/// Live links keyed by device
pub mod registrar;

/// Address-keyed registries
pub mod registry;

/// Addresses, identities, packets
pub mod types;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use acceptor::{Acceptor, AcceptorState};
pub use config::LinkProviderConfig;
pub use connector::Connector;
pub use crate::core::implementations::{AdapterStats, MemoryRadio, MemoryRadioAdapter};
pub use crate::core::{
    IdentityVerifier, LinkObserver, ListeningEndpoint, RadioTransport, RawConnection,
    StreamMultiplexer, TransportEvent,
};
pub use discovery::Discoverer;
pub use error::{ErrorKind, LinkError, LinkResult};
pub use handshake::{run_handshake, HandshakeContext, HandshakeOutcome, HandshakeRole};
pub use link::Link;
pub use provider::{RadioLinkProvider, PROVIDER_NAME, PROVIDER_PRIORITY};
pub use registrar::LinkRegistrar;
pub use registry::{AttemptRegistry, SocketRegistry, SocketReservation};
pub use types::{
    Certificate, DeviceType, LocalIdentity, Packet, PeerAddress, PeerIdentity, ServiceId,
};
