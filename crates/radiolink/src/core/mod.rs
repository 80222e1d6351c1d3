//! Transport boundary: collaborator traits, raw connections, and the
//! in-memory radio used by tests and simulations.

pub mod connection;
pub mod implementations;
pub mod traits;

pub use connection::{
    BoxedReader, BoxedWriter, MultiplexedChannel, RawConnection, RawStream, SplitMultiplexer,
    StreamMultiplexer,
};
pub use traits::{IdentityVerifier, LinkObserver, ListeningEndpoint, RadioTransport, TransportEvent};
