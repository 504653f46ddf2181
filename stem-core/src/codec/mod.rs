//! Packet framing for stream transports.
//!
//! [`PacketCodec`] implements `tokio_util`'s `Decoder`/`Encoder` so it can
//! drive a `Framed` stream, and also exposes [`PacketCodec::decode_all`] for
//! the client's reader stage, which accumulates raw chunks itself.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StemError;
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::packet::{Packet, PacketType};

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl PacketCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode a single packet into its wire form.
    pub fn encode_packet(kind: PacketType, payload: impl Into<Bytes>) -> Result<Bytes, StemError> {
        Packet::new(kind, payload)?.to_bytes()
    }

    /// Extract every complete packet from `buf`.
    ///
    /// A trailing partial packet stays in `buf` for the next call. A corrupt
    /// header ends extraction: the packets decoded before it are returned
    /// together with the error and `buf` is cleared, since nothing after a
    /// bad header can be framed.
    pub fn decode_all(&mut self, buf: &mut BytesMut) -> (Vec<Packet>, Option<StemError>) {
        let mut packets = Vec::new();
        loop {
            match self.decode(buf) {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => return (packets, None),
                Err(e) => {
                    buf.clear();
                    return (packets, Some(e));
                }
            }
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = StemError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::from_bytes(&src[..HEADER_SIZE])?;
        let frame_length = header.frame_length();
        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_length);
        let payload = frame.split_off(HEADER_SIZE).freeze();
        Packet::new(header.kind(), payload).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = StemError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: PacketType, payload: &[u8]) -> Bytes {
        PacketCodec::encode_packet(kind, payload.to_vec()).unwrap()
    }

    #[test]
    fn decodes_multiple_packets_from_one_chunk() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame(PacketType::Data, b"one"));
        buf.extend_from_slice(&frame(PacketType::Heartbeat, b""));
        buf.extend_from_slice(&frame(PacketType::Kick, b"bye"));

        let (packets, err) = PacketCodec::new().decode_all(&mut buf);
        assert!(err.is_none());
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].kind(), PacketType::Data);
        assert_eq!(&packets[0].payload()[..], b"one");
        assert_eq!(packets[1].kind(), PacketType::Heartbeat);
        assert_eq!(packets[2].kind(), PacketType::Kick);
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_trailing_partial_packet() {
        let full = frame(PacketType::Data, b"complete");
        let partial = frame(PacketType::Data, b"partial-payload");

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full);
        buf.extend_from_slice(&partial[..6]);

        let mut codec = PacketCodec::new();
        let (packets, err) = codec.decode_all(&mut buf);
        assert!(err.is_none());
        assert_eq!(packets.len(), 1);
        assert_eq!(&buf[..], &partial[..6]);

        buf.extend_from_slice(&partial[6..]);
        let (packets, err) = codec.decode_all(&mut buf);
        assert!(err.is_none());
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0].payload()[..], b"partial-payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn header_split_across_reads() {
        let bytes = frame(PacketType::Data, b"xy");
        let mut buf = BytesMut::from(&bytes[..2]);
        let mut codec = PacketCodec::new();
        assert!(codec.decode_all(&mut buf).0.is_empty());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn bad_type_returns_earlier_packets_and_error() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame(PacketType::Data, b"ok"));
        buf.extend_from_slice(&[0x7F, 0x00, 0x00, 0x01, 0xAA]);

        let (packets, err) = PacketCodec::new().decode_all(&mut buf);
        assert_eq!(packets.len(), 1);
        assert!(matches!(err, Some(StemError::UnknownVariant { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn encoder_matches_encode_packet() {
        let mut dst = BytesMut::new();
        let packet = Packet::new(PacketType::Data, b"abc".to_vec()).unwrap();
        PacketCodec::new().encode(packet, &mut dst).unwrap();
        assert_eq!(&dst[..], &frame(PacketType::Data, b"abc")[..]);
    }
}
