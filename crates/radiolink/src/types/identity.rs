//! Application-level device identity
//!
//! [`LocalIdentity`] describes this device and renders the identity packet we
//! send during the handshake. [`PeerIdentity`] is what we recover from the
//! packet a peer sends, once its certificate has been verified.

use super::packet::{Packet, PACKET_TYPE_IDENTITY};
use crate::error::{LinkError, LinkResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Protocol version advertised in identity packets
pub const PROTOCOL_VERSION: i64 = 7;

const PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";
const PEM_FOOTER: &str = "-----END CERTIFICATE-----";

/// Identity packet body keys
mod keys {
    pub const DEVICE_ID: &str = "deviceId";
    pub const DEVICE_NAME: &str = "deviceName";
    pub const DEVICE_TYPE: &str = "deviceType";
    pub const PROTOCOL_VERSION: &str = "protocolVersion";
    pub const INCOMING_CAPABILITIES: &str = "incomingCapabilities";
    pub const OUTGOING_CAPABILITIES: &str = "outgoingCapabilities";
    pub const CERTIFICATE: &str = "certificate";
}

/// Kind of device, as advertised by the device itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Handheld phone
    Phone,
    /// Tablet
    Tablet,
    /// Desktop computer
    Desktop,
    /// Laptop computer
    Laptop,
    /// Television
    Tv,
    /// Anything we do not recognise
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceType {
    /// Wire name of this device type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Laptop => "laptop",
            Self::Tv => "tv",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name, falling back to [`DeviceType::Unknown`]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "phone" => Self::Phone,
            "tablet" => Self::Tablet,
            "desktop" => Self::Desktop,
            "laptop" => Self::Laptop,
            "tv" => Self::Tv,
            _ => Self::Unknown,
        }
    }
}

/// A verified peer certificate
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Wrap DER-encoded certificate bytes
    pub fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// DER-encoded certificate bytes
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Hex SHA-256 fingerprint of the DER encoding
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Description of this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    /// Unique device identifier
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Kind of device
    pub device_type: DeviceType,
    /// Protocol version we speak
    pub protocol_version: i64,
    /// Packet types we accept
    pub incoming_capabilities: Vec<String>,
    /// Packet types we send
    pub outgoing_capabilities: Vec<String>,
    /// Our DER-encoded certificate
    pub certificate_der: Vec<u8>,
}

impl LocalIdentity {
    /// Create an identity with no declared capabilities
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: DeviceType,
        certificate_der: Vec<u8>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type,
            protocol_version: PROTOCOL_VERSION,
            incoming_capabilities: Vec::new(),
            outgoing_capabilities: Vec::new(),
            certificate_der,
        }
    }

    /// Render the identity packet sent during the handshake
    pub fn to_identity_packet(&self) -> Packet {
        Packet::new(PACKET_TYPE_IDENTITY)
            .with(keys::DEVICE_ID, self.device_id.clone())
            .with(keys::DEVICE_NAME, self.device_name.clone())
            .with(keys::DEVICE_TYPE, self.device_type.as_str())
            .with(keys::PROTOCOL_VERSION, self.protocol_version)
            .with(keys::INCOMING_CAPABILITIES, self.incoming_capabilities.clone())
            .with(keys::OUTGOING_CAPABILITIES, self.outgoing_capabilities.clone())
            .with(keys::CERTIFICATE, STANDARD.encode(&self.certificate_der))
    }
}

/// Authenticated identity of a remote device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Unique device identifier
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Kind of device
    pub device_type: DeviceType,
    /// Protocol version the peer speaks
    pub protocol_version: i64,
    /// Packet types the peer accepts
    pub incoming_capabilities: Vec<String>,
    /// Packet types the peer sends
    pub outgoing_capabilities: Vec<String>,
    /// Verified certificate
    pub certificate: Certificate,
}

impl PeerIdentity {
    /// Build an identity from a received identity packet and its verified
    /// certificate
    pub fn from_identity_packet(packet: &Packet, certificate: Certificate) -> LinkResult<Self> {
        let device_id = identity_device_id(packet)?;
        Ok(Self {
            device_id: device_id.to_owned(),
            device_name: packet
                .get_str(keys::DEVICE_NAME)
                .unwrap_or(device_id)
                .to_owned(),
            device_type: packet
                .get_str(keys::DEVICE_TYPE)
                .map(DeviceType::from_wire)
                .unwrap_or_default(),
            protocol_version: packet.get_i64(keys::PROTOCOL_VERSION).unwrap_or_default(),
            incoming_capabilities: packet.get_string_list(keys::INCOMING_CAPABILITIES),
            outgoing_capabilities: packet.get_string_list(keys::OUTGOING_CAPABILITIES),
            certificate,
        })
    }
}

/// Device identifier declared by an identity packet
pub fn identity_device_id(packet: &Packet) -> LinkResult<&str> {
    match packet.get_str(keys::DEVICE_ID) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(LinkError::protocol("identity packet has no deviceId")),
    }
}

/// Decode the certificate field of an identity packet to DER bytes
///
/// Accepts bare base64 as well as PEM armour; whitespace inside the base64
/// body is ignored.
pub fn decode_certificate_field(packet: &Packet) -> LinkResult<Vec<u8>> {
    let encoded = packet
        .get_str(keys::CERTIFICATE)
        .ok_or_else(|| LinkError::authentication("identity packet has no certificate"))?;

    let body: String = encoded
        .replace(PEM_HEADER, "")
        .replace(PEM_FOOTER, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if body.is_empty() {
        return Err(LinkError::authentication("identity packet has an empty certificate"));
    }

    STANDARD
        .decode(body)
        .map_err(|e| LinkError::authentication(format!("certificate is not valid base64: {e}")))
}
