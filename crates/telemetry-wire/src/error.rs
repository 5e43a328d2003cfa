//! Error type for wire-level encode/decode/compression failures.

/// Failures that can occur while turning a [`crate::Message`] into bytes
/// or back.
///
/// All variants surface to `telemetry-client` as `ClientError::Protocol`.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("envelope missing required field: {0}")]
    MissingField(&'static str),
    #[error("envelope field out of range: {0}")]
    InvalidEnum(&'static str),
    #[error("frame header malformed: {0}")]
    BadFrame(String),
    #[error("compression failed: {0}")]
    Compression(String),
}
