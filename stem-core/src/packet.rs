//! Framed packets: the unit exchanged on the wire.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::StemError;
use crate::header::{HEADER_SIZE, PacketHeader};

// ── PacketType ───────────────────────────────────────────────────

/// Packet kinds understood by the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Client capabilities (client → server) or negotiation result (server → client).
    Handshake = 0x01,
    /// Acknowledges the server handshake; arms the session.
    HandshakeAck = 0x02,
    /// Empty keep-alive, sent by both sides.
    Heartbeat = 0x03,
    /// Carries one encoded application message.
    Data = 0x04,
    /// Server-initiated forced disconnect.
    Kick = 0x05,
}

impl TryFrom<u8> for PacketType {
    type Error = StemError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Handshake),
            0x02 => Ok(PacketType::HandshakeAck),
            0x03 => Ok(PacketType::Heartbeat),
            0x04 => Ok(PacketType::Data),
            0x05 => Ok(PacketType::Kick),
            _ => Err(StemError::UnknownVariant {
                type_name: "PacketType",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Packet ───────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketType,
    payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketType, payload: impl Into<Bytes>) -> Result<Self, StemError> {
        let payload = payload.into();
        // Validates the length up front so encoding cannot fail later.
        PacketHeader::new(kind, payload.len())?;
        Ok(Self { kind, payload })
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: PacketType::Heartbeat,
            payload: Bytes::new(),
        }
    }

    pub fn handshake_ack() -> Self {
        Self {
            kind: PacketType::HandshakeAck,
            payload: Bytes::new(),
        }
    }

    pub fn kind(&self) -> PacketType {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// Append the wire form of this packet to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<(), StemError> {
        let header = PacketHeader::new(self.kind, self.payload.len())?;
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.extend_from_slice(&header.to_bytes());
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, StemError> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &self.kind)
            .field("payload_length", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_roundtrip() {
        for kind in [
            PacketType::Handshake,
            PacketType::HandshakeAck,
            PacketType::Heartbeat,
            PacketType::Data,
            PacketType::Kick,
        ] {
            assert_eq!(PacketType::try_from(kind as u8).unwrap(), kind);
        }
    }

    #[test]
    fn packet_type_invalid() {
        assert!(PacketType::try_from(0x00).is_err());
        assert!(PacketType::try_from(0x06).is_err());
    }

    #[test]
    fn heartbeat_is_header_only() {
        let bytes = Packet::heartbeat().to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn data_packet_wire_form() {
        let packet = Packet::new(PacketType::Data, b"abc".to_vec()).unwrap();
        assert_eq!(packet.payload_length(), 3);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x04, 0x00, 0x00, 0x03, b'a', b'b', b'c']);
    }
}
