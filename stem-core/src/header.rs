//! Fixed-size packet header.
//!
//! ```text
//! type:    u8   (1)
//! length:  u24  (3, big-endian)
//! ```

use crate::error::StemError;
use crate::packet::PacketType;

/// Encoded size of a packet header on the wire.
pub const HEADER_SIZE: usize = 4;

/// Largest payload a 24-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = (1 << 24) - 1;

pub type HeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    kind: PacketType,
    length: usize,
}

impl PacketHeader {
    pub fn new(kind: PacketType, length: usize) -> Result<Self, StemError> {
        if length > MAX_PAYLOAD_SIZE {
            return Err(StemError::PacketTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { kind, length })
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let len = self.length as u32;
        [
            self.kind as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StemError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StemError::ProtocolViolation("header shorter than 4 bytes"));
        }
        let kind = PacketType::try_from(bytes[0])?;
        let length =
            ((bytes[1] as usize) << 16) | ((bytes[2] as usize) << 8) | bytes[3] as usize;
        Ok(Self { kind, length })
    }

    pub fn kind(&self) -> PacketType {
        self.kind
    }

    pub fn payload_length(&self) -> usize {
        self.length
    }

    /// Header plus payload.
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.length
    }
}
