//! Domain-specific error types for the stem protocol client.
//!
//! All fallible operations return `Result<T, StemError>`.
//! No panics on malformed input; every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StemError>;

/// The canonical error type for the stem protocol client.
#[derive(Debug, Error)]
pub enum StemError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The server sent a packet of the wrong type for the current phase.
    #[error("unexpected packet: expected {expected}, got {actual}")]
    UnexpectedPacket {
        expected: &'static str,
        actual: String,
    },

    /// A packet or message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet / Message Errors ──────────────────────────────────
    /// The payload does not fit in a 24-bit length field.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// A message envelope was truncated or malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// An uncompressed route must fit in a single length byte.
    #[error("route too long: {0} bytes (max 255)")]
    RouteTooLong(usize),

    /// A compressed route referenced a code absent from the dictionary.
    #[error("unknown route code: {0}")]
    UnknownRouteCode(u16),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// TLS configuration or server name was rejected.
    #[error("tls error: {0}")]
    Tls(String),

    /// The peer closed the stream, or the transport was closed locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// An operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a session is still live.
    #[error("already connected")]
    AlreadyConnected,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// JSON encoding or decoding of a handshake payload failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inflating a compressed payload failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StemError::PacketTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = StemError::UnexpectedPacket {
            expected: "Handshake",
            actual: "Data".into(),
        };
        assert!(e.to_string().contains("Handshake"));
        assert!(e.to_string().contains("Data"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: StemError = io_err.into();
        assert!(matches!(e, StemError::Connection(_)));
    }

    #[test]
    fn from_json_and_utf8() {
        let e: StemError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(e, StemError::Json(_)));

        let e: StemError = String::from_utf8(vec![0xFF]).unwrap_err().into();
        assert!(matches!(e, StemError::InvalidUtf8(_)));
    }
}
