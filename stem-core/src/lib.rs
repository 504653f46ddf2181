//! # stem-core
//!
//! Client library for a length-prefixed, multiplexed request/response
//! protocol over TCP or TLS.
//!
//! This crate contains:
//! - **Packets**: `PacketHeader`, `Packet`, `PacketType` — 4-byte framed units
//! - **Codec**: `PacketCodec` for framed stream I/O via `tokio_util`
//! - **Messages**: `Message`, `MessageCodec`, `RouteDictionary` — the
//!   request/notify/response/push envelope
//! - **Handshake**: capability exchange, heartbeat and dictionary negotiation
//! - **Ledger**: `PendingLedger` — bounded in-flight request tracking with
//!   timeout reaping
//! - **Network**: `Transport` trait and `StreamTransport` (TCP, TLS, pipes)
//! - **Client**: `Client` — connect, send, receive, disconnect
//! - **Error**: `StemError` — typed, `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod flags;
pub mod handshake;
pub mod header;
pub mod ledger;
pub mod message;
pub mod network;
pub mod packet;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{Client, MessageReceiver};
pub use codec::PacketCodec;
pub use config::{ClientConfig, HandshakeConfig};
pub use error::{Result, StemError};
pub use flags::MessageFlags;
pub use handshake::{HandshakeData, HandshakeSys};
pub use header::{HEADER_SIZE, MAX_PAYLOAD_SIZE, PacketHeader};
pub use ledger::{PendingLedger, PendingRequest};
pub use message::{Message, MessageCodec, MessageType, RouteDictionary};
pub use network::{ConnectionInfo, StreamTransport, Transport};
pub use packet::{Packet, PacketType};
