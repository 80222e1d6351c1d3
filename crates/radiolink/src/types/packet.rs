//! Newline-framed packets
//!
//! Each packet is one JSON object followed by a single `\n`. The framing has no
//! length prefix: a streaming reader knows a packet is complete when it sees
//! the newline.

use crate::error::{LinkError, LinkResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::SystemTime;

/// Packet type carried by identity payloads
pub const PACKET_TYPE_IDENTITY: &str = "radiolink.identity";

/// Message-boundary marker terminating every packet on the wire
pub const PACKET_TERMINATOR: u8 = b'\n';

/// A self-describing application packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Sender-assigned identifier (milliseconds since the UNIX epoch)
    pub id: i64,
    /// Packet kind
    #[serde(rename = "type")]
    pub packet_type: String,
    /// Kind-specific fields
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl Packet {
    /// Create an empty packet of the given kind
    pub fn new(packet_type: impl Into<String>) -> Self {
        let millis = SystemTime::UNIX_EPOCH
            .elapsed()
            .unwrap_or_default()
            .as_millis();
        let id = i64::try_from(millis).unwrap_or(i64::MAX);
        Self {
            id,
            packet_type: packet_type.into(),
            body: Map::new(),
        }
    }

    /// Set a body field
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.body.insert(key.into(), value.into());
    }

    /// Builder form of [`Packet::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Whether this packet is of the given kind
    pub fn is_type(&self, packet_type: &str) -> bool {
        self.packet_type == packet_type
    }

    /// String body field, if present
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// Integer body field, if present
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.body.get(key).and_then(Value::as_i64)
    }

    /// String-array body field; non-string entries are skipped
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        self.body
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Encode as one wire frame, terminator included
    pub fn to_frame(&self) -> LinkResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(PACKET_TERMINATOR);
        Ok(bytes)
    }

    /// Decode one wire frame; a trailing terminator is optional
    pub fn from_frame(frame: &[u8]) -> LinkResult<Self> {
        let line = trim_frame(frame);
        if line.is_empty() {
            return Err(LinkError::protocol("empty packet"));
        }
        Ok(serde_json::from_slice(line)?)
    }
}

fn trim_frame(frame: &[u8]) -> &[u8] {
    let mut end = frame.len();
    while end > 0 && matches!(frame[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &frame[..end]
}
