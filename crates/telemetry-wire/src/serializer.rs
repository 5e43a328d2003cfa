//! One `WireSerializer` implementation per wire format (spec §4.B).
//!
//! Each encodes the full envelope, decodes it back, and then runs
//! [`Message::validate`]. Size estimation is conservative and never
//! actually serializes the message.

use crate::envelope::{Message, ProtocolKind};
use crate::error::WireError;

/// Encode/decode one [`Message`] under a fixed wire format.
pub trait WireSerializer: Send + Sync {
    fn protocol(&self) -> ProtocolKind;
    fn content_type(&self) -> &'static str;
    fn encode(&self, message: &Message) -> Result<Vec<u8>, WireError>;
    fn decode(&self, bytes: &[u8]) -> Result<Message, WireError>;
    fn estimate_size(&self, message: &Message) -> usize;

    /// All three formats here support compression; kept as a method (not
    /// a constant) so a future binary-only format could opt out.
    fn supports_compression(&self) -> bool {
        true
    }
}

/// Per-protocol envelope tax used by [`Message::estimate_size`] — field
/// names cost bytes in JSON but not in the binary formats.
const JSON_OVERHEAD: usize = 80;
const MSGPACK_OVERHEAD: usize = 24;
const CBOR_OVERHEAD: usize = 28;

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct JsonSerializer;

impl WireSerializer for JsonSerializer {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Json
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(message).map_err(|e| WireError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, WireError> {
        let message: Message =
            serde_json::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    fn estimate_size(&self, message: &Message) -> usize {
        message.estimate_size(JSON_OVERHEAD)
    }
}

// ---------------------------------------------------------------------------
// MessagePack
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MsgPackSerializer;

impl WireSerializer for MsgPackSerializer {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::MessagePack
    }

    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(message).map_err(|e| WireError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, WireError> {
        let message: Message =
            rmp_serde::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    fn estimate_size(&self, message: &Message) -> usize {
        message.estimate_size(MSGPACK_OVERHEAD)
    }
}

// ---------------------------------------------------------------------------
// CBOR
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CborSerializer;

impl WireSerializer for CborSerializer {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Cbor
    }

    fn content_type(&self) -> &'static str {
        "application/cbor"
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, WireError> {
        serde_cbor::to_vec(message).map_err(|e| WireError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, WireError> {
        let message: Message =
            serde_cbor::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    fn estimate_size(&self, message: &Message) -> usize {
        message.estimate_size(CBOR_OVERHEAD)
    }
}

/// Construct the serializer for a given protocol. Small factory used by
/// the protocol manager so it never matches on `ProtocolKind` itself.
pub fn for_protocol(protocol: ProtocolKind) -> Box<dyn WireSerializer> {
    match protocol {
        ProtocolKind::Json => Box::new(JsonSerializer),
        ProtocolKind::MessagePack => Box::new(MsgPackSerializer),
        ProtocolKind::Cbor => Box::new(CborSerializer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageType;

    fn sample() -> Message {
        let mut m = Message::new(
            "msg-1",
            MessageType::Telemetry,
            serde_json::json!({"v": 1.5, "channel": "temp"}),
            1_700_000_000_000,
            ProtocolKind::Json,
        );
        m.priority = Some(crate::envelope::Priority::High);
        m.retry_count = Some(2);
        m
    }

    #[test]
    fn json_round_trips() {
        let s = JsonSerializer;
        let msg = sample();
        let bytes = s.encode(&msg).unwrap();
        let decoded = s.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn msgpack_round_trips() {
        let s = MsgPackSerializer;
        let msg = sample();
        let bytes = s.encode(&msg).unwrap();
        let decoded = s.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn cbor_round_trips() {
        let s = CborSerializer;
        let msg = sample();
        let bytes = s.encode(&msg).unwrap();
        let decoded = s.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        let s = JsonSerializer;
        assert!(s.decode(b"not json").is_err());
    }

    #[test]
    fn decode_rejects_empty_id_after_deserialize() {
        let s = JsonSerializer;
        let raw = serde_json::json!({
            "id": "",
            "type": "status",
            "payload": {},
            "timestamp": 0,
            "protocol": "json",
            "compressed": false,
            "acknowledged": false,
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        assert!(s.decode(&bytes).is_err());
    }

    #[test]
    fn size_estimate_is_conservative_and_cheaper_for_binary_formats() {
        let msg = sample();
        let json_est = JsonSerializer.estimate_size(&msg);
        let msgpack_est = MsgPackSerializer.estimate_size(&msg);
        assert!(json_est > msgpack_est);
    }
}
