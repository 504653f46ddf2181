//! Connection handshake.
//!
//! ```text
//! client                         server
//!   ── Handshake {sys, user} ──►
//!   ◄── Handshake {code, sys} ──   (optionally zlib/gzip compressed)
//!   ── HandshakeAck ──────────►
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::PacketCodec;
use crate::compression;
use crate::config::HandshakeConfig;
use crate::error::StemError;
use crate::message::RouteDictionary;
use crate::network::Transport;
use crate::packet::{Packet, PacketType};

/// Status code of a successful handshake.
pub const HANDSHAKE_OK: i32 = 200;

/// Used when the server asks for a heartbeat interval below one second.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(3);

// ── Client → server ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct HandshakeRequest<'a> {
    sys: ClientInfo<'a>,
    user: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo<'a> {
    platform: &'a str,
    lib_version: &'a str,
    client_build_number: &'a str,
    client_version: &'a str,
}

/// JSON body of the client's handshake packet.
pub fn request_payload(config: &HandshakeConfig) -> Result<Vec<u8>, StemError> {
    let request = HandshakeRequest {
        sys: ClientInfo {
            platform: &config.platform,
            lib_version: &config.lib_version,
            client_build_number: &config.client_build_number,
            client_version: &config.client_version,
        },
        user: &config.user,
    };
    Ok(serde_json::to_vec(&request)?)
}

// ── Server → client ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeData {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub sys: HandshakeSys,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeSys {
    /// Route name → numeric code, for route compression.
    #[serde(default)]
    pub dict: Option<HashMap<String, u16>>,
    /// Heartbeat interval in seconds.
    #[serde(default)]
    pub heartbeat: i64,
    #[serde(default)]
    pub serializer: String,
}

impl HandshakeData {
    /// Parse a server handshake payload, inflating it first if compressed.
    pub fn parse(payload: &[u8]) -> Result<Self, StemError> {
        if compression::is_compressed(payload) {
            let inflated = compression::inflate(payload)?;
            return Ok(serde_json::from_slice(&inflated)?);
        }
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        if self.sys.heartbeat < 1 {
            DEFAULT_HEARTBEAT
        } else {
            Duration::from_secs(self.sys.heartbeat as u64)
        }
    }

    pub fn dictionary(&self) -> RouteDictionary {
        self.sys
            .dict
            .clone()
            .map(RouteDictionary::new)
            .unwrap_or_default()
    }
}

// ── Negotiation ──────────────────────────────────────────────────

/// Result of a completed handshake.
#[derive(Debug)]
pub struct Negotiated {
    pub heartbeat: Duration,
    pub dictionary: RouteDictionary,
    pub serializer: String,
    /// Packets that arrived in the same read as the handshake.
    pub backlog: Vec<Packet>,
    /// Undecoded trailing bytes from that read.
    pub buffer: BytesMut,
}

/// Run the handshake over `transport`.
///
/// Does not apply a deadline; callers wrap this in `tokio::time::timeout`.
pub async fn negotiate(
    transport: &dyn Transport,
    config: &HandshakeConfig,
) -> Result<Negotiated, StemError> {
    let hello = PacketCodec::encode_packet(PacketType::Handshake, request_payload(config)?)?;
    transport.write(&hello).await?;

    let mut codec = PacketCodec::new();
    let mut buffer = BytesMut::new();
    let mut packets = loop {
        let chunk = transport.read().await?;
        buffer.extend_from_slice(&chunk);
        let (packets, err) = codec.decode_all(&mut buffer);
        if let Some(e) = err {
            return Err(e);
        }
        if !packets.is_empty() {
            break packets;
        }
    };

    let first = packets.remove(0);
    if first.kind() != PacketType::Handshake {
        return Err(StemError::UnexpectedPacket {
            expected: "Handshake",
            actual: first.kind().to_string(),
        });
    }

    let data = HandshakeData::parse(first.payload())?;
    debug!(?data, "handshake from server");
    if data.code != HANDSHAKE_OK {
        warn!(code = data.code, "server handshake returned non-success code");
    }

    transport.write(&Packet::handshake_ack().to_bytes()?).await?;

    Ok(Negotiated {
        heartbeat: data.heartbeat_interval(),
        dictionary: data.dictionary(),
        serializer: data.sys.serializer,
        backlog: packets,
        buffer,
    })
}
