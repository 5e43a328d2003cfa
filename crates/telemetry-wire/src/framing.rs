//! Binary framing header (spec §4.B).
//!
//! Wire form: a 4-byte little-endian `u32` byte length, followed by the
//! UTF-8 JSON encoding of [`FrameHeader`], followed by the (possibly
//! compressed) payload bytes. Telemetry-specific codepaths put the header
//! immediately before the telemetry payload the same way.

use serde::{Deserialize, Serialize};

use crate::compression::CompressionKind;
use crate::envelope::ProtocolKind;
use crate::error::WireError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub version: u16,
    pub protocol: ProtocolKind,
    pub compressed: bool,
    pub compression_type: CompressionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
}

pub const FRAME_VERSION: u16 = 1;

impl FrameHeader {
    pub fn new(protocol: ProtocolKind, compressed: bool, compression_type: CompressionKind, timestamp: i64) -> Self {
        FrameHeader {
            version: FRAME_VERSION,
            protocol,
            compressed,
            compression_type,
            schema_id: None,
            timestamp,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, payload: &[u8]) -> Self {
        self.checksum = Some(crc32(payload));
        self
    }
}

/// Prefix `payload` with a length-prefixed JSON-encoded [`FrameHeader`].
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let header_json =
        serde_json::to_vec(header).map_err(|e| WireError::BadFrame(e.to_string()))?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| WireError::BadFrame("header too large".to_owned()))?;

    let mut out = Vec::with_capacity(4 + header_json.len() + payload.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a framed buffer back into its header and payload.
pub fn decode_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), WireError> {
    if bytes.len() < 4 {
        return Err(WireError::BadFrame("buffer shorter than length prefix".to_owned()));
    }
    let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let header_start = 4;
    let header_end = header_start
        .checked_add(header_len)
        .ok_or_else(|| WireError::BadFrame("header length overflow".to_owned()))?;
    if bytes.len() < header_end {
        return Err(WireError::BadFrame("buffer shorter than declared header length".to_owned()));
    }

    let header: FrameHeader = serde_json::from_slice(&bytes[header_start..header_end])
        .map_err(|e| WireError::BadFrame(e.to_string()))?;
    Ok((header, &bytes[header_end..]))
}

/// Small table-free CRC32 (IEEE 802.3 polynomial), good enough as an
/// integrity sanity check on framed payloads — not cryptographic.
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = 0u32.wrapping_sub(crc & 1);
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let header = FrameHeader::new(ProtocolKind::Json, false, CompressionKind::None, 1234);
        let payload = b"hello world";
        let framed = encode_frame(&header, payload).unwrap();
        let (decoded_header, decoded_payload) = decode_frame(&framed).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn checksum_detects_corruption() {
        let header = FrameHeader::new(ProtocolKind::Cbor, true, CompressionKind::Gzip, 1)
            .with_checksum(b"payload-bytes");
        assert_eq!(header.checksum, Some(crc32(b"payload-bytes")));
        assert_ne!(header.checksum, Some(crc32(b"different-bytes")));
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        assert!(decode_frame(&[1, 2]).is_err());
    }
}
