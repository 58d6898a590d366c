//! Codec registry for stored block representations.
//!
//! Identifies the compression algorithm of a stored byte stream from its magic
//! bytes and dispatches to the matching codec. Codec failures never make a
//! block unreadable: the passthrough helpers hand back the input unchanged and
//! report the failure alongside it.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::CompressionConfig;

/// Stored representation of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Not compressed (or not recognised).
    Unknown,
    Zlib,
    Zip,
    Lz4,
    Zstd,
    Snappy,
}

impl Algorithm {
    /// Every compressed algorithm, in detection precedence order.
    pub const COMPRESSED: [Algorithm; 5] = [
        Algorithm::Zlib,
        Algorithm::Zip,
        Algorithm::Lz4,
        Algorithm::Zstd,
        Algorithm::Snappy,
    ];

    /// Magic-byte prefix written by this algorithm's encoder.
    pub fn signature(&self) -> &'static [u8] {
        match self {
            Algorithm::Unknown => &[],
            // Deflate at the default level; other levels change the FLG byte.
            Algorithm::Zlib => &[0x78, 0x9c],
            // Local file header.
            Algorithm::Zip => &[0x50, 0x4b, 0x03, 0x04],
            // LZ4 frame magic 0x184D2204, little endian.
            Algorithm::Lz4 => &[0x04, 0x22, 0x4d, 0x18],
            Algorithm::Zstd => &[0x28, 0xb5, 0x2f, 0xfd],
            // Snappy framing stream identifier chunk.
            Algorithm::Snappy => &[0xff, 0x06, 0x00, 0x00],
        }
    }

    pub fn is_compressed(&self) -> bool {
        *self != Algorithm::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Unknown => "unknown",
            Algorithm::Zlib => "zlib",
            Algorithm::Zip => "zip",
            Algorithm::Lz4 => "lz4",
            Algorithm::Zstd => "zstd",
            Algorithm::Snappy => "snappy",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" | "none" | "raw" => Ok(Algorithm::Unknown),
            "zlib" => Ok(Algorithm::Zlib),
            "zip" => Ok(Algorithm::Zip),
            "lz4" => Ok(Algorithm::Lz4),
            "zstd" => Ok(Algorithm::Zstd),
            "snappy" => Ok(Algorithm::Snappy),
            other => Err(CodecError::UnknownName(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{algorithm} codec failed: {source}")]
    Io {
        algorithm: Algorithm,
        #[source]
        source: std::io::Error,
    },

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("zip archive holds no entries")]
    EmptyArchive,

    #[error("unknown compression algorithm name: {0}")]
    UnknownName(String),
}

impl CodecError {
    fn io(algorithm: Algorithm) -> impl FnOnce(std::io::Error) -> CodecError {
        move |source| CodecError::Io { algorithm, source }
    }
}

/// Identify the algorithm that produced `data`.
///
/// Signatures are tested in the order of [`Algorithm::COMPRESSED`]. Inputs
/// shorter than a signature never match it.
pub fn detect(data: &[u8]) -> Algorithm {
    Algorithm::COMPRESSED
        .into_iter()
        .find(|algorithm| data.starts_with(algorithm.signature()))
        .unwrap_or(Algorithm::Unknown)
}

/// How a passthrough decode went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Input was not compressed; returned as is.
    Raw,
    /// Input was decoded with the given algorithm.
    Decoded(Algorithm),
    /// Decoding with the given algorithm failed; input returned as is.
    Failed(Algorithm),
}

/// Result of [`Codec::decode_or_passthrough`].
#[derive(Debug, Clone)]
pub struct Decoded {
    pub data: Bytes,
    pub outcome: DecodeOutcome,
}

/// Encoder/decoder dispatch for the fixed algorithm set.
#[derive(Debug, Clone)]
pub struct Codec {
    config: CompressionConfig,
}

impl Codec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Decode `data` as `algorithm`. `Unknown` is the identity.
    pub fn decode(&self, data: &[u8], algorithm: Algorithm) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        match algorithm {
            Algorithm::Unknown => out.extend_from_slice(data),
            Algorithm::Zlib => {
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(CodecError::io(algorithm))?;
            }
            Algorithm::Zip => {
                let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
                if archive.is_empty() {
                    return Err(CodecError::EmptyArchive);
                }
                let mut entry = archive.by_index(0)?;
                entry
                    .read_to_end(&mut out)
                    .map_err(CodecError::io(algorithm))?;
            }
            Algorithm::Lz4 => {
                lz4_flex::frame::FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(CodecError::io(algorithm))?;
            }
            Algorithm::Zstd => {
                out = zstd::decode_all(data).map_err(CodecError::io(algorithm))?;
            }
            Algorithm::Snappy => {
                snap::read::FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(CodecError::io(algorithm))?;
            }
        }
        Ok(out)
    }

    /// Encode `data` as `algorithm`. `Unknown` is the identity.
    pub fn encode(&self, data: &[u8], algorithm: Algorithm) -> Result<Vec<u8>, CodecError> {
        let io = CodecError::io(algorithm);
        match algorithm {
            Algorithm::Unknown => Ok(data.to_vec()),
            Algorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).map_err(CodecError::io(algorithm))?;
                encoder.finish().map_err(io)
            }
            Algorithm::Zip => {
                let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
                let options = zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated);
                writer.start_file("block", options)?;
                writer.write_all(data).map_err(io)?;
                Ok(writer.finish()?.into_inner())
            }
            Algorithm::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(data).map_err(CodecError::io(algorithm))?;
                encoder
                    .finish()
                    .map_err(|e| io(std::io::Error::other(e)))
            }
            Algorithm::Zstd => zstd::encode_all(data, self.config.zstd_level).map_err(io),
            Algorithm::Snappy => {
                let mut encoder = snap::write::FrameEncoder::new(Vec::new());
                encoder.write_all(data).map_err(CodecError::io(algorithm))?;
                encoder.into_inner().map_err(|e| io(e.into_error()))
            }
        }
    }

    /// Detect and decode, handing back the input untouched if decoding fails.
    pub fn decode_or_passthrough(&self, data: Bytes) -> Decoded {
        let algorithm = detect(&data);
        if !algorithm.is_compressed() {
            return Decoded {
                data,
                outcome: DecodeOutcome::Raw,
            };
        }

        match self.decode(&data, algorithm) {
            Ok(decoded) => Decoded {
                data: Bytes::from(decoded),
                outcome: DecodeOutcome::Decoded(algorithm),
            },
            Err(e) => {
                warn!(%algorithm, error = %e, len = data.len(), "Decode failed, serving stored bytes");
                Decoded {
                    data,
                    outcome: DecodeOutcome::Failed(algorithm),
                }
            }
        }
    }

    /// Encode `data` for the store so that a later read decodes back to it.
    ///
    /// Raw bytes are only stored raw when they carry no signature; otherwise
    /// the read path would decode them. Such payloads, and payloads whose
    /// requested codec fails, are wrapped with the demotion algorithm (zstd
    /// when that is `Unknown`). Returns the bytes and the algorithm used.
    pub fn encode_for_storage(
        &self,
        data: &[u8],
        algorithm: Algorithm,
    ) -> Result<(Vec<u8>, Algorithm), CodecError> {
        let looks_compressed = detect(data).is_compressed();
        if algorithm.is_compressed() {
            match self.encode(data, algorithm) {
                Ok(encoded) => return Ok((encoded, algorithm)),
                Err(e) => warn!(%algorithm, error = %e, "Encode failed, falling back"),
            }
        }

        if !looks_compressed {
            return Ok((data.to_vec(), Algorithm::Unknown));
        }

        let fallback = if self.config.demote_algorithm.is_compressed() {
            self.config.demote_algorithm
        } else {
            Algorithm::Zstd
        };
        let encoded = self.encode(data, fallback)?;
        Ok((encoded, fallback))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_short_and_plain_inputs() {
        assert_eq!(detect(b""), Algorithm::Unknown);
        assert_eq!(detect(&[0x78]), Algorithm::Unknown);
        assert_eq!(detect(b"hello world"), Algorithm::Unknown);
        // Truncated 4-byte signatures do not match.
        assert_eq!(detect(&[0x28, 0xb5, 0x2f]), Algorithm::Unknown);
    }

    #[test]
    fn test_detect_precedence_prefers_zlib() {
        let mut data = vec![0x78, 0x9c];
        data.extend_from_slice(&[0u8; 16]);
        assert_eq!(detect(&data), Algorithm::Zlib);
    }

    #[test]
    fn test_zstd_roundtrip_compresses() {
        let codec = Codec::default();
        let data = vec![42u8; 4096];

        let compressed = codec.encode(&data, Algorithm::Zstd).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(detect(&compressed), Algorithm::Zstd);
        assert_eq!(codec.decode(&compressed, Algorithm::Zstd).unwrap(), data);
    }

    #[test]
    fn test_passthrough_on_corrupt_stream() {
        let codec = Codec::default();
        let mut corrupt = Algorithm::Lz4.signature().to_vec();
        corrupt.extend_from_slice(&[0xff; 32]);

        let decoded = codec.decode_or_passthrough(Bytes::from(corrupt.clone()));
        assert_eq!(decoded.outcome, DecodeOutcome::Failed(Algorithm::Lz4));
        assert_eq!(&decoded.data[..], &corrupt[..]);
    }

    #[test]
    fn test_raw_input_bypasses_decode() {
        let codec = Codec::default();
        let decoded = codec.decode_or_passthrough(Bytes::from_static(b"plain"));
        assert_eq!(decoded.outcome, DecodeOutcome::Raw);
        assert_eq!(&decoded.data[..], b"plain");
    }

    #[test]
    fn test_storage_encoding_wraps_signed_raw_payload() {
        let codec = Codec::default();
        let inner = codec.encode(b"inner", Algorithm::Lz4).unwrap();

        let (stored, algorithm) = codec.encode_for_storage(&inner, Algorithm::Unknown).unwrap();
        assert_eq!(algorithm, Algorithm::Zstd);
        let decoded = codec.decode_or_passthrough(Bytes::from(stored));
        assert_eq!(decoded.outcome, DecodeOutcome::Decoded(Algorithm::Zstd));
        assert_eq!(&decoded.data[..], &inner[..]);

        let (stored, algorithm) = codec.encode_for_storage(b"plain", Algorithm::Unknown).unwrap();
        assert_eq!(algorithm, Algorithm::Unknown);
        assert_eq!(stored, b"plain");
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("ZSTD".parse::<Algorithm>().unwrap(), Algorithm::Zstd);
        assert_eq!("raw".parse::<Algorithm>().unwrap(), Algorithm::Unknown);
        assert!("brotli".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::Snappy.to_string(), "snappy");
    }
}
