//! Core data types shared by every component

pub mod address;
pub mod identity;
pub mod packet;

pub use address::{PeerAddress, ServiceId, DEFAULT_SERVICE_ID};
pub use identity::{
    decode_certificate_field, identity_device_id, Certificate, DeviceType, LocalIdentity,
    PeerIdentity, PROTOCOL_VERSION,
};
pub use packet::{Packet, PACKET_TERMINATOR, PACKET_TYPE_IDENTITY};
