//! Client tuning knobs.
//!
//! Deserializable so the binary can embed it as the `[client]` table of its
//! TOML file; every field has a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one [`Client`](crate::Client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub addr: String,
    /// A request without a response after this long gets a synthetic timeout.
    pub request_timeout_ms: u64,
    /// Maximum concurrent in-flight requests.
    pub max_inflight: usize,
    /// Capacity of the inbound message queue handed to the application.
    pub inbound_capacity: usize,
    /// Capacity of the queue between the reader and dispatch stages.
    pub packet_queue_capacity: usize,
    /// How often expired requests are reaped.
    pub reaper_interval_ms: u64,
    /// Deadline for the whole handshake exchange.
    pub handshake_timeout_ms: u64,
    /// Size of each transport read.
    pub read_buffer_size: usize,
    /// Compress outbound message bodies.
    pub compress_bodies: bool,
    /// Client information sent in the handshake.
    pub handshake: HandshakeConfig,
}

/// The `sys` and `user` sections of the client handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub platform: String,
    pub lib_version: String,
    pub client_build_number: String,
    pub client_version: String,
    /// Arbitrary application fields forwarded verbatim.
    pub user: serde_json::Map<String, serde_json::Value>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3250".into(),
            request_timeout_ms: 5_000,
            max_inflight: 30,
            inbound_capacity: 10,
            packet_queue_capacity: 10,
            reaper_interval_ms: 1_000,
            handshake_timeout_ms: 10_000,
            read_buffer_size: 4096,
            compress_bodies: false,
            handshake: HandshakeConfig::default(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            platform: std::env::consts::OS.into(),
            lib_version: env!("CARGO_PKG_VERSION").into(),
            client_build_number: "1".into(),
            client_version: "1.0".into(),
            user: serde_json::Map::new(),
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl ClientConfig {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    // Zero capacities would panic in tokio or block every sender forever.

    pub fn max_inflight(&self) -> usize {
        self.max_inflight.max(1)
    }

    pub fn inbound_capacity(&self) -> usize {
        self.inbound_capacity.max(1)
    }

    pub fn packet_queue_capacity(&self) -> usize {
        self.packet_queue_capacity.max(1)
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_inflight(), 30);
        assert_eq!(cfg.reaper_interval(), Duration::from_secs(1));
        assert_eq!(cfg.inbound_capacity(), 10);
    }

    #[test]
    fn zero_capacities_are_clamped() {
        let cfg = ClientConfig {
            max_inflight: 0,
            inbound_capacity: 0,
            packet_queue_capacity: 0,
            reaper_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(cfg.max_inflight(), 1);
        assert_eq!(cfg.inbound_capacity(), 1);
        assert_eq!(cfg.packet_queue_capacity(), 1);
        assert_eq!(cfg.reaper_interval(), Duration::from_millis(1));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{"addr":"10.0.0.1:9000","handshake":{"platform":"ios"}}"#)
                .unwrap();
        assert_eq!(cfg.addr, "10.0.0.1:9000");
        assert_eq!(cfg.max_inflight, 30);
        assert_eq!(cfg.handshake.platform, "ios");
        assert_eq!(cfg.handshake.client_version, "1.0");
    }
}
