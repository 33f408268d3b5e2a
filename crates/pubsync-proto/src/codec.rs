//! Frame codecs.
//!
//! A frame is one encoded message plus its delimiter:
//! - JSON: UTF-8 body followed by `\n`
//! - CBOR: `u32` big-endian body length followed by the body

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Largest accepted frame body, in bytes.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length of the CBOR frame header.
pub const CBOR_HEADER_LEN: usize = 4;

/// Wire encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Newline-delimited JSON
    #[default]
    Json,
    /// Length-prefixed CBOR
    Cbor,
}

impl Codec {
    /// Encode a message into a complete frame.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails or the body is too large.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => {
                let mut frame =
                    serde_json::to_vec(message).map_err(|e| CodecError::Serialize(e.to_string()))?;
                check_len(frame.len())?;
                frame.push(b'\n');
                Ok(frame)
            }
            Codec::Cbor => {
                let mut body = Vec::new();
                ciborium::into_writer(message, &mut body)
                    .map_err(|e| CodecError::Serialize(e.to_string()))?;
                check_len(body.len())?;
                let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
                    len: body.len(),
                    max: MAX_FRAME_LEN,
                })?;
                let mut frame = Vec::with_capacity(CBOR_HEADER_LEN + body.len());
                frame.extend_from_slice(&len.to_be_bytes());
                frame.extend_from_slice(&body);
                Ok(frame)
            }
        }
    }

    /// Decode a frame body, with the delimiter or length prefix already
    /// stripped.
    ///
    /// # Errors
    ///
    /// Returns error if the body is not a valid message.
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, CodecError> {
        check_len(body.len())?;
        match self {
            Codec::Json => {
                serde_json::from_slice(body).map_err(|e| CodecError::Deserialize(e.to_string()))
            }
            Codec::Cbor => {
                ciborium::from_reader(body).map_err(|e| CodecError::Deserialize(e.to_string()))
            }
        }
    }

    /// Decode a body into a loosely typed value, for error reporting.
    #[must_use]
    pub fn decode_value(&self, body: &[u8]) -> Option<serde_json::Value> {
        self.decode(body).ok()
    }

    /// Decode one complete frame, delimiter or length prefix included.
    ///
    /// # Errors
    ///
    /// Returns error if the framing is wrong or the body is invalid.
    pub fn decode_frame<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => {
                let body = frame.strip_suffix(b"\n").unwrap_or(frame);
                let body = body.strip_suffix(b"\r").unwrap_or(body);
                self.decode(body)
            }
            Codec::Cbor => {
                let header: [u8; CBOR_HEADER_LEN] = frame
                    .get(..CBOR_HEADER_LEN)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or(CodecError::Truncated {
                        expected: CBOR_HEADER_LEN,
                        actual: frame.len(),
                    })?;
                let len = u32::from_be_bytes(header) as usize;
                let body = &frame[CBOR_HEADER_LEN..];
                if body.len() != len {
                    return Err(CodecError::Truncated {
                        expected: len,
                        actual: body.len(),
                    });
                }
                self.decode(body)
            }
        }
    }
}

fn check_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(())
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::Cbor => write!(f, "cbor"),
        }
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "cbor" => Ok(Codec::Cbor),
            other => Err(CodecError::UnknownCodec(other.to_string())),
        }
    }
}

/// Errors for frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// Body exceeds the frame limit
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Body length
        len: usize,
        /// Limit
        max: usize,
    },
    /// Frame shorter than announced
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Announced length
        expected: usize,
        /// Available length
        actual: usize,
    },
    /// Codec name not recognized
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}
