//! Peer-address keyed registries guarding connection establishment

pub mod attempts;
pub mod sockets;

pub use attempts::AttemptRegistry;
pub use sockets::{SocketRegistry, SocketReservation};
