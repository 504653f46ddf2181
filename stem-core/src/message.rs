//! Application-level message envelope and its codec.
//!
//! Wire layout of a `Data` packet payload:
//!
//! ```text
//! flag:   u8       bit 0 route compressed, bits 1..=3 type,
//!                  bit 4 compressed body, bit 5 error
//! id:     varint   Request / Response only
//! route:  u16 code (compressed) or u8 length + utf-8 bytes
//!                  Request / Notify / Push only
//! body:   rest of the payload
//! ```

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::compression;
use crate::error::StemError;
use crate::flags::{MessageFlags, TYPE_MASK, TYPE_SHIFT};

/// Longest route that fits the single length byte.
pub const MAX_ROUTE_LENGTH: usize = u8::MAX as usize;

// ── MessageType ──────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Expects exactly one `Response` with the same id.
    Request = 0x00,
    /// Fire-and-forget.
    Notify = 0x01,
    /// Answer to a `Request`.
    Response = 0x02,
    /// Server-initiated message.
    Push = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = StemError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageType::Request),
            0x01 => Ok(MessageType::Notify),
            0x02 => Ok(MessageType::Response),
            0x03 => Ok(MessageType::Push),
            _ => Err(StemError::UnknownVariant {
                type_name: "MessageType",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl MessageType {
    /// Whether the envelope carries a correlation id on the wire.
    pub fn has_id(&self) -> bool {
        matches!(self, MessageType::Request | MessageType::Response)
    }

    /// Whether the envelope carries a route on the wire.
    pub fn has_route(&self) -> bool {
        !matches!(self, MessageType::Response)
    }
}

// ── Message ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    /// Correlation id; only meaningful for `Request` and `Response`.
    pub id: u64,
    pub route: String,
    pub data: Bytes,
    pub error: bool,
}

impl Message {
    pub fn new(kind: MessageType, id: u64, route: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id,
            route: route.into(),
            data: data.into(),
            error: false,
        }
    }

    /// The synthetic error response delivered when `request` is reaped.
    pub fn timeout_response(request: &Message) -> Self {
        let payload = serde_json::json!({ "code": 408, "msg": "request timeout" }).to_string();
        Self {
            kind: MessageType::Response,
            id: request.id,
            route: request.route.clone(),
            data: Bytes::from(payload),
            error: true,
        }
    }

    pub fn is_response(&self) -> bool {
        self.kind == MessageType::Response
    }
}

// ── RouteDictionary ──────────────────────────────────────────────

/// Server-assigned route name ↔ numeric code table.
///
/// Installed once per connection during the handshake and read-only after.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDictionary {
    codes: HashMap<String, u16>,
    routes: HashMap<u16, String>,
}

impl RouteDictionary {
    pub fn new(dict: HashMap<String, u16>) -> Self {
        let routes = dict.iter().map(|(route, &code)| (code, route.clone())).collect();
        Self {
            codes: dict,
            routes,
        }
    }

    pub fn code(&self, route: &str) -> Option<u16> {
        self.codes.get(route).copied()
    }

    pub fn route(&self, code: u16) -> Option<&str> {
        self.routes.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

// ── MessageCodec ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    dictionary: RouteDictionary,
    compress_bodies: bool,
}

impl MessageCodec {
    pub fn new(dictionary: RouteDictionary) -> Self {
        Self {
            dictionary,
            compress_bodies: false,
        }
    }

    /// Deflate non-empty outbound bodies and set the compressed-body flag.
    pub fn with_body_compression(mut self, enabled: bool) -> Self {
        self.compress_bodies = enabled;
        self
    }

    pub fn dictionary(&self) -> &RouteDictionary {
        &self.dictionary
    }

    pub fn encode(&self, message: &Message) -> Result<Bytes, StemError> {
        let kind = message.kind;
        let mut flags = MessageFlags::empty();

        let code = if kind.has_route() {
            self.dictionary.code(&message.route)
        } else {
            None
        };
        if code.is_some() {
            flags |= MessageFlags::ROUTE_COMPRESSED;
        }
        if message.error {
            flags |= MessageFlags::ERROR;
        }

        let body = if self.compress_bodies && !message.data.is_empty() {
            flags |= MessageFlags::COMPRESSED_BODY;
            Bytes::from(compression::deflate(&message.data)?)
        } else {
            message.data.clone()
        };

        let mut buf = BytesMut::with_capacity(1 + 10 + 1 + message.route.len() + body.len());
        buf.put_u8(((kind as u8) << TYPE_SHIFT) | flags.bits());

        if kind.has_id() {
            put_varint(&mut buf, message.id);
        }

        if kind.has_route() {
            match code {
                Some(code) => buf.put_u16(code),
                None => {
                    let route = message.route.as_bytes();
                    if route.len() > MAX_ROUTE_LENGTH {
                        return Err(StemError::RouteTooLong(route.len()));
                    }
                    buf.put_u8(route.len() as u8);
                    buf.extend_from_slice(route);
                }
            }
        }

        buf.extend_from_slice(&body);
        Ok(buf.freeze())
    }

    pub fn decode(&self, data: &Bytes) -> Result<Message, StemError> {
        let Some(&flag) = data.first() else {
            return Err(StemError::InvalidMessage("empty message"));
        };
        let kind = MessageType::try_from((flag >> TYPE_SHIFT) & TYPE_MASK)?;
        let flags = MessageFlags::from_bits_truncate(flag);
        let mut offset = 1;

        let id = if kind.has_id() {
            let (id, used) = read_varint(&data[offset..])?;
            offset += used;
            id
        } else {
            0
        };

        let route = if !kind.has_route() {
            String::new()
        } else if flags.contains(MessageFlags::ROUTE_COMPRESSED) {
            if data.len() < offset + 2 {
                return Err(StemError::InvalidMessage("truncated route code"));
            }
            let code = u16::from_be_bytes([data[offset], data[offset + 1]]);
            offset += 2;
            self.dictionary
                .route(code)
                .ok_or(StemError::UnknownRouteCode(code))?
                .to_string()
        } else {
            let Some(&len) = data.get(offset) else {
                return Err(StemError::InvalidMessage("truncated route length"));
            };
            offset += 1;
            let end = offset + len as usize;
            if data.len() < end {
                return Err(StemError::InvalidMessage("truncated route"));
            }
            let route = String::from_utf8(data[offset..end].to_vec())?;
            offset = end;
            route
        };

        let body = data.slice(offset..);
        let body = if flags.contains(MessageFlags::COMPRESSED_BODY) {
            Bytes::from(compression::inflate(&body)?)
        } else {
            body
        };

        Ok(Message {
            kind,
            id,
            route,
            data: body,
            error: flags.contains(MessageFlags::ERROR),
        })
    }
}

// ── Varint ───────────────────────────────────────────────────────

/// Base-128, least-significant group first.
fn put_varint(buf: &mut BytesMut, mut n: u64) {
    loop {
        let byte = (n & 0x7F) as u8;
        n >>= 7;
        if n == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn read_varint(data: &[u8]) -> Result<(u64, usize), StemError> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        let shift = 7 * i as u32;
        // the tenth group only has room for bit 63
        if shift >= u64::BITS || (shift == 63 && byte & 0x7E != 0) {
            return Err(StemError::InvalidMessage("message id overflows u64"));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(StemError::InvalidMessage("truncated message id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> RouteDictionary {
        RouteDictionary::new(HashMap::from([
            ("game.room.join".to_string(), 7u16),
            ("game.room.chat".to_string(), 0x0102u16),
        ]))
    }

    #[test]
    fn message_type_roundtrip() {
        for kind in [
            MessageType::Request,
            MessageType::Notify,
            MessageType::Response,
            MessageType::Push,
        ] {
            assert_eq!(MessageType::try_from(kind as u8).unwrap(), kind);
        }
        assert!(MessageType::try_from(0x04).is_err());
    }

    #[test]
    fn request_wire_layout() {
        let codec = MessageCodec::default();
        let msg = Message::new(MessageType::Request, 300, "a.b", b"x".to_vec());
        let bytes = codec.encode(&msg).unwrap();
        // flag, varint(300) = ac 02, len, route, body
        assert_eq!(&bytes[..], &[0x00, 0xAC, 0x02, 3, b'a', b'.', b'b', b'x']);
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let codec = MessageCodec::default();
        let cases = [
            Message::new(MessageType::Request, 1, "game.test.ping", b"x".to_vec()),
            Message::new(MessageType::Notify, 0, "game.test.note", Vec::new()),
            Message::new(MessageType::Push, 0, "onChat", b"{\"hi\":1}".to_vec()),
            Message::new(MessageType::Response, u64::from(u32::MAX) + 5, "", b"ok".to_vec()),
        ];
        for msg in cases {
            let decoded = codec.decode(&codec.encode(&msg).unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn dictionary_compresses_known_routes() {
        let codec = MessageCodec::new(dict());
        assert_eq!(codec.dictionary().len(), 2);
        assert_eq!(codec.dictionary().code("game.room.chat"), Some(0x0102));
        let msg = Message::new(MessageType::Notify, 0, "game.room.chat", b"hi".to_vec());
        let bytes = codec.encode(&msg).unwrap();
        assert_eq!(bytes[0], (1 << TYPE_SHIFT) | MessageFlags::ROUTE_COMPRESSED.bits());
        assert_eq!(&bytes[1..3], &[0x01, 0x02]);
        assert_eq!(codec.decode(&bytes).unwrap(), msg);

        // unknown routes stay uncompressed
        let other = Message::new(MessageType::Notify, 0, "game.room.leave", Vec::new());
        let bytes = codec.encode(&other).unwrap();
        assert_eq!(bytes[0] & MessageFlags::ROUTE_COMPRESSED.bits(), 0);
    }

    #[test]
    fn unknown_route_code_fails() {
        let bytes = Bytes::from_static(&[(3 << TYPE_SHIFT) | 0x01, 0x00, 0x63]);
        let err = MessageCodec::new(dict()).decode(&bytes).unwrap_err();
        assert!(matches!(err, StemError::UnknownRouteCode(0x63)));
    }

    #[test]
    fn error_flag_and_compressed_body() {
        let codec = MessageCodec::default().with_body_compression(true);
        let mut msg = Message::new(MessageType::Response, 9, "", vec![b'z'; 512]);
        msg.error = true;
        let bytes = codec.encode(&msg).unwrap();
        assert!(bytes.len() < 100);
        assert_ne!(bytes[0] & MessageFlags::COMPRESSED_BODY.bits(), 0);
        assert_eq!(MessageCodec::default().decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn rejects_long_route() {
        let msg = Message::new(MessageType::Notify, 0, "r".repeat(256), Vec::new());
        assert!(matches!(
            MessageCodec::default().encode(&msg),
            Err(StemError::RouteTooLong(256))
        ));
    }

    #[test]
    fn truncated_inputs_fail() {
        let codec = MessageCodec::default();
        assert!(codec.decode(&Bytes::new()).is_err());
        // request with unterminated varint
        assert!(codec.decode(&Bytes::from_static(&[0x00, 0x80, 0x80])).is_err());
        // notify claiming a 5-byte route with 2 present
        assert!(codec.decode(&Bytes::from_static(&[0x02, 5, b'a', b'b'])).is_err());
    }

    #[test]
    fn varint_accepts_u64_max_and_rejects_wider_ids() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf[9], 0x01);
        assert_eq!(read_varint(&buf).unwrap(), (u64::MAX, 10));

        let mut wide = buf.to_vec();
        wide[9] = 0x7F;
        assert!(matches!(
            read_varint(&wide),
            Err(StemError::InvalidMessage("message id overflows u64"))
        ));

        let mut eleven = buf.to_vec();
        eleven[9] = 0x81;
        eleven.push(0x01);
        assert!(read_varint(&eleven).is_err());

        // same check through the codec: request flag, then the oversized id
        let mut payload = vec![0x00];
        payload.extend_from_slice(&wide);
        assert!(MessageCodec::default().decode(&Bytes::from(payload)).is_err());
    }

    #[test]
    fn timeout_response_mirrors_request() {
        let req = Message::new(MessageType::Request, 42, "game.slow", b"q".to_vec());
        let timeout = Message::timeout_response(&req);
        assert_eq!(timeout.kind, MessageType::Response);
        assert_eq!(timeout.id, 42);
        assert_eq!(timeout.route, "game.slow");
        assert!(timeout.error);
        let body: serde_json::Value = serde_json::from_slice(&timeout.data).unwrap();
        assert_eq!(body["code"], 408);
    }
}
