//! Streaming gzip/deflate compression for wire payloads (spec §4.B).
//!
//! Compression is skipped by the caller (not here) when the payload is
//! below a configurable threshold or already binary; this module only
//! does the mechanical compress/decompress and ratio measurement.
//!
//! Per the open question in spec.md §9, the compression ratio is never a
//! placeholder constant here — it is always `compressed.len() as f64 /
//! uncompressed.len() as f64`, measured at the point of compression.

use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use std::io::{Read, Write};

use crate::WireError;

/// Which streaming compressor produced a compressed payload.
///
/// Detection of compressed payloads must rely on this field in the frame
/// header, never on sniffing magic bytes in the payload (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    None,
    Gzip,
    Deflate,
}

use serde::{Deserialize, Serialize};

/// Result of a compression pass: the compressed bytes and the measured
/// ratio (`compressed_len / uncompressed_len`).
pub struct CompressedPayload {
    pub bytes: Vec<u8>,
    pub ratio: f64,
}

/// Compresses/decompresses payloads for a fixed [`CompressionKind`].
pub struct Compressor {
    kind: CompressionKind,
}

impl Compressor {
    pub fn new(kind: CompressionKind) -> Self {
        Compressor { kind }
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    pub fn compress(&self, input: &[u8]) -> Result<CompressedPayload, WireError> {
        let bytes = match self.kind {
            CompressionKind::None => input.to_vec(),
            CompressionKind::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(input)
                    .map_err(|e| WireError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| WireError::Compression(e.to_string()))?
            }
            CompressionKind::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(input)
                    .map_err(|e| WireError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| WireError::Compression(e.to_string()))?
            }
        };
        let ratio = if input.is_empty() {
            1.0
        } else {
            bytes.len() as f64 / input.len() as f64
        };
        Ok(CompressedPayload { bytes, ratio })
    }

    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        match self.kind {
            CompressionKind::None => out.extend_from_slice(input),
            CompressionKind::Gzip => {
                GzDecoder::new(input)
                    .read_to_end(&mut out)
                    .map_err(|e| WireError::Compression(e.to_string()))?;
            }
            CompressionKind::Deflate => {
                DeflateDecoder::new(input)
                    .read_to_end(&mut out)
                    .map_err(|e| WireError::Compression(e.to_string()))?;
            }
        }
        Ok(out)
    }
}

/// Below this many bytes, compression is skipped regardless of configured
/// threshold overrides — matches the default `compressionThreshold` in
/// spec §6's `alerts` namespace, reused here as the wire-level default.
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 512;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let c = Compressor::new(CompressionKind::Gzip);
        let input = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = c.compress(&input).unwrap();
        let restored = c.decompress(&compressed.bytes).unwrap();
        assert_eq!(restored, input);
        assert!(compressed.ratio < 1.0);
    }

    #[test]
    fn deflate_round_trips() {
        let c = Compressor::new(CompressionKind::Deflate);
        let input = b"repeat repeat repeat repeat repeat repeat".to_vec();
        let compressed = c.compress(&input).unwrap();
        let restored = c.decompress(&compressed.bytes).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn none_is_identity() {
        let c = Compressor::new(CompressionKind::None);
        let input = b"abc".to_vec();
        let compressed = c.compress(&input).unwrap();
        assert_eq!(compressed.bytes, input);
        assert_eq!(compressed.ratio, 1.0);
    }

    #[test]
    fn ratio_is_measured_not_a_placeholder() {
        let c = Compressor::new(CompressionKind::Gzip);
        let highly_compressible = vec![b'a'; 10_000];
        let compressed = c.compress(&highly_compressible).unwrap();
        assert!(compressed.ratio < 0.1, "ratio={}", compressed.ratio);
    }
}
