//! # Payload Representations
//!
//! Every payload exists in two equivalent wire encodings, selected per packet
//! by the header's `payload_type` byte:
//!
//! - **Binary**: a fixed-size big-endian struct. Strings occupy NUL-padded
//!   fixed-width fields; a value that does not fit is rejected, never cut.
//! - **Json**: a `serde_json` object with the same fields.
//!
//! Payloads that carry raw file bytes after their metadata put those bytes
//! directly after the fixed struct (Binary) or after a single `0xFF` border
//! byte following the JSON document (Json). `0xFF` never occurs in UTF-8, so
//! the first border byte is unambiguous. A JSON document without a border
//! carries no trailing bytes.
//!
//! ## Usage
//! ```ignore
//! use bot_socket::core::serialization::{PayloadType, WirePayload};
//!
//! let bytes = ack.to_payload(PayloadType::Json)?;
//! let back = GenericAck::from_payload(&bytes, PayloadType::Json)?;
//! ```

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{constants, ProtocolError, Result};

/// Border byte between JSON metadata and raw trailing bytes
pub const JSON_BYTE_BORDER: u8 = 0xFF;

/// Wire representation of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PayloadType {
    /// Fixed-size binary struct (default)
    #[default]
    Binary,
    /// JSON object
    Json,
}

impl PayloadType {
    /// Identifier byte used in the header
    pub fn as_byte(self) -> u8 {
        match self {
            PayloadType::Binary => 0,
            PayloadType::Json => 1,
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            PayloadType::Binary => "Binary",
            PayloadType::Json => "JSON",
        }
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(PayloadType::Binary),
            1 => Ok(PayloadType::Json),
            other => Err(ProtocolError::InvalidPayloadType(other)),
        }
    }
}

/// A value with both a fixed binary layout and a JSON form.
pub trait WirePayload: Serialize + DeserializeOwned + Sized {
    /// Exact size of the binary layout
    const BINARY_SIZE: usize;

    /// Append the binary layout to `out`.
    fn write_binary(&self, out: &mut BytesMut) -> Result<()>;

    /// Parse the binary layout; `src` is exactly `BINARY_SIZE` bytes.
    fn read_binary(src: &[u8]) -> Result<Self>;

    /// Encode in the requested representation.
    fn to_payload(&self, payload_type: PayloadType) -> Result<Vec<u8>> {
        match payload_type {
            PayloadType::Binary => {
                let mut out = BytesMut::with_capacity(Self::BINARY_SIZE);
                self.write_binary(&mut out)?;
                if out.len() != Self::BINARY_SIZE {
                    return Err(ProtocolError::SerializeError(format!(
                        "binary layout produced {} bytes, expected {}",
                        out.len(),
                        Self::BINARY_SIZE
                    )));
                }
                Ok(out.to_vec())
            }
            PayloadType::Json => {
                serde_json::to_vec(self).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
        }
    }

    /// Encode followed by raw trailing bytes.
    fn to_payload_with_trailing(&self, payload_type: PayloadType, tail: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.to_payload(payload_type)?;
        out.reserve(tail.len() + 1);
        if payload_type == PayloadType::Json {
            out.push(JSON_BYTE_BORDER);
        }
        out.extend_from_slice(tail);
        Ok(out)
    }

    /// Decode a payload that must contain exactly one value.
    fn from_payload(data: &[u8], payload_type: PayloadType) -> Result<Self> {
        match payload_type {
            PayloadType::Binary => {
                if data.len() != Self::BINARY_SIZE {
                    return Err(ProtocolError::InvalidArgument(format!(
                        "{}: got {} bytes, expected {}",
                        constants::ERR_PAYLOAD_SIZE,
                        data.len(),
                        Self::BINARY_SIZE
                    )));
                }
                Self::read_binary(data)
            }
            PayloadType::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }

    /// Decode a value followed by raw trailing bytes.
    fn from_payload_with_trailing(data: &[u8], payload_type: PayloadType) -> Result<(Self, &[u8])> {
        let (head, tail) = match payload_type {
            PayloadType::Binary => {
                if data.len() < Self::BINARY_SIZE {
                    return Err(ProtocolError::InvalidArgument(format!(
                        "{}: got {} bytes, expected at least {}",
                        constants::ERR_PAYLOAD_SIZE,
                        data.len(),
                        Self::BINARY_SIZE
                    )));
                }
                data.split_at(Self::BINARY_SIZE)
            }
            PayloadType::Json => match data.iter().position(|b| *b == JSON_BYTE_BORDER) {
                Some(border) => (&data[..border], &data[border + 1..]),
                None => (data, &data[data.len()..]),
            },
        };
        Ok((Self::from_payload(head, payload_type)?, tail))
    }
}

/// Write `value` into a NUL-padded field of `width` bytes.
pub fn put_fixed_str(out: &mut BytesMut, value: &str, width: usize) -> Result<()> {
    if value.len() >= width {
        return Err(ProtocolError::InvalidArgument(format!(
            "{}: {} bytes into {}",
            constants::ERR_STRING_TOO_LONG,
            value.len(),
            width
        )));
    }
    out.put_slice(value.as_bytes());
    out.put_bytes(0, width - value.len());
    Ok(())
}

/// Read a NUL-padded field of `width` bytes.
pub fn get_fixed_str(src: &mut &[u8], width: usize) -> Result<String> {
    if src.remaining() < width {
        return Err(ProtocolError::InvalidArgument(constants::ERR_PAYLOAD_SIZE.into()));
    }
    let field = &src[..width];
    let end = field.iter().position(|b| *b == 0).unwrap_or(width);
    let value = std::str::from_utf8(&field[..end])
        .map_err(|e| ProtocolError::DeserializeError(e.to_string()))?
        .to_owned();
    src.advance(width);
    Ok(value)
}

/// Read a fixed-size byte array.
pub fn get_array<const N: usize>(src: &mut &[u8]) -> Result<[u8; N]> {
    if src.remaining() < N {
        return Err(ProtocolError::InvalidArgument(constants::ERR_PAYLOAD_SIZE.into()));
    }
    let mut out = [0u8; N];
    src.copy_to_slice(&mut out);
    Ok(out)
}

/// Hex encoding for fixed-size byte arrays in JSON.
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(&text, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
