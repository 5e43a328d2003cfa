//! Wire-level types for the telemetry/command client: the message envelope,
//! the binary framing header, and the JSON / MessagePack / CBOR serializers.
//!
//! Nothing in this crate is network-aware; `telemetry-client` decides when
//! to call into it.

pub mod compression;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod serializer;

pub use compression::{CompressionKind, Compressor};
pub use envelope::{Message, MessageType, Priority, ProtocolKind};
pub use error::WireError;
pub use framing::FrameHeader;
pub use serializer::{CborSerializer, JsonSerializer, MsgPackSerializer, WireSerializer};
