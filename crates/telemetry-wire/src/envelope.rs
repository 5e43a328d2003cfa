//! The message envelope (spec §3, §6) and its enums.

use serde::{Deserialize, Serialize};

/// Discriminates the payload carried by a [`Message`].
///
/// `alert*` variants belong to the alert pipeline (§4.K); the rest are
/// general-purpose and flow through the event bus or the telemetry
/// subscription manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Command,
    Telemetry,
    Status,
    Heartbeat,
    Auth,
    Error,
    Notification,
    Binary,
    Alert,
    AlertAck,
    AlertSync,
    AlertBatch,
}

/// Delivery priority. Ordered so a `BinaryHeap<QueuedMessage>` naturally
/// pops `Critical` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Which serializer produced (or must consume) the wire form of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Json,
    MessagePack,
    Cbor,
}

impl ProtocolKind {
    pub fn all() -> [ProtocolKind; 3] {
        [ProtocolKind::Json, ProtocolKind::MessagePack, ProtocolKind::Cbor]
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolKind::Json => "json",
            ProtocolKind::MessagePack => "messagepack",
            ProtocolKind::Cbor => "cbor",
        };
        write!(f, "{s}")
    }
}

/// The envelope wrapping every message exchanged with mission control.
///
/// Invariants (spec §3): `id` unique within a session; `timestamp` is
/// monotonic client time at emission; `protocol` identifies the serializer
/// used for the wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub timestamp: i64,
    pub protocol: ProtocolKind,
    pub compressed: bool,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
        timestamp: i64,
        protocol: ProtocolKind,
    ) -> Self {
        Message {
            id: id.into(),
            message_type,
            payload,
            timestamp,
            protocol,
            compressed: false,
            acknowledged: false,
            priority: None,
            retry_count: None,
        }
    }

    /// Run the envelope validator spec §4.B requires after decode: required
    /// fields present, `type`/`priority` within their enums. Because
    /// `MessageType`/`Priority` are closed Rust enums, the only thing left
    /// to check post-deserialize is that `id` is non-empty — everything
    /// else is enforced by `serde` rejecting unknown variants.
    pub fn validate(&self) -> Result<(), crate::WireError> {
        if self.id.is_empty() {
            return Err(crate::WireError::MissingField("id"));
        }
        Ok(())
    }

    /// Conservative byte-size estimate without actually serializing,
    /// per spec §4.B. `overhead` is the per-protocol envelope tax (field
    /// names for JSON, tag bytes for MessagePack/CBOR).
    pub fn estimate_size(&self, overhead: usize) -> usize {
        let payload_estimate = estimate_json_value_size(&self.payload);
        overhead + self.id.len() + payload_estimate + 32 // timestamp/flags/enum tags
    }
}

fn estimate_json_value_size(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 4,
        serde_json::Value::Bool(_) => 5,
        serde_json::Value::Number(_) => 8,
        serde_json::Value::String(s) => s.len() + 2,
        serde_json::Value::Array(items) => {
            items.iter().map(estimate_json_value_size).sum::<usize>() + 2
        }
        serde_json::Value::Object(map) => {
            map.iter()
                .map(|(k, v)| k.len() + 3 + estimate_json_value_size(v))
                .sum::<usize>()
                + 2
        }
    }
}
