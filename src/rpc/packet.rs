//! The wire unit exchanged over a [`Channel`](super::channel::Channel).

use super::error::{RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Packet type of a successful reply.
pub const RESPONSE: &str = "response";

/// Packet type of a failed reply.
pub const FAILURE: &str = "failure";

/// Raw binary attachment carried next to a packet.
pub type RawBuffer = Vec<u8>;

/// One message on the channel.
///
/// `kind` is serialized as `type` and is either a method name (client to server) or
/// [`RESPONSE`] / [`FAILURE`] (server to client). Missing `id` or `type` fields decode as
/// empty strings so the server can answer them with a protocol failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Correlation id, `"{instance}--{counter}"` for client requests.
    #[serde(default)]
    pub id: String,
    /// Method name or reply type.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// JSON payload.
    #[serde(default)]
    pub payload: Value,
    /// Binary attachments; travel out-of-band and are never part of the JSON header.
    #[serde(skip)]
    pub buffers: Vec<RawBuffer>,
}

impl Packet {
    /// Create a request packet.
    pub fn request(
        id: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
        buffers: Vec<RawBuffer>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: method.into(),
            payload,
            buffers,
        }
    }

    /// Create a successful reply.
    pub fn response(id: impl Into<String>, payload: Value, buffers: Vec<RawBuffer>) -> Self {
        Self {
            id: id.into(),
            kind: RESPONSE.to_string(),
            payload,
            buffers,
        }
    }

    /// Create a failure reply carrying an error text.
    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FAILURE.to_string(),
            payload: Value::String(message.into()),
            buffers: Vec::new(),
        }
    }

    /// Whether this packet is a failure reply.
    pub fn is_failure(&self) -> bool {
        self.kind == FAILURE
    }

    /// Render the JSON header. Buffers are left out; send them alongside.
    pub fn to_header_json(&self) -> RpcResult<String> {
        serde_json::to_string(self).map_err(|e| RpcError::decode("packet header", e))
    }

    /// Rebuild a packet from a JSON header and its out-of-band buffers.
    pub fn from_header_json(header: &str, buffers: Vec<RawBuffer>) -> RpcResult<Self> {
        let mut packet: Packet =
            serde_json::from_str(header).map_err(|e| RpcError::decode("packet header", e))?;
        packet.buffers = buffers;
        Ok(packet)
    }

    /// Text of a failure payload; non-string payloads are rendered as JSON.
    pub fn failure_message(&self) -> String {
        match &self.payload {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Payload and buffers of a successful call.
///
/// This is the typed counterpart of attaching the reply buffers to the payload under a
/// reserved `buffers` key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// JSON payload of the reply.
    pub payload: Value,
    /// Binary attachments of the reply.
    pub buffers: Vec<RawBuffer>,
}

impl Response {
    /// A reply with a payload and no buffers.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            buffers: Vec::new(),
        }
    }

    /// Attach binary buffers.
    pub fn with_buffers(mut self, buffers: Vec<RawBuffer>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Deserialize the payload into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> RpcResult<T> {
        T::deserialize(&self.payload).map_err(|e| RpcError::decode("response payload", e))
    }
}

impl From<Packet> for Response {
    fn from(packet: Packet) -> Self {
        Self {
            payload: packet.payload,
            buffers: packet.buffers,
        }
    }
}
