//! Configuration for the probe client.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stem_core::ClientConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Connection, handshake and request tuning.
    pub client: ClientConfig,
    /// Transport security.
    pub tls: TlsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Transport security.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Connect over TLS instead of plain TCP.
    pub enabled: bool,
    /// Accept any server certificate.
    pub insecure: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default().to_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = CliConfig::default().to_toml().unwrap();
        assert!(text.contains("request_timeout_ms"));
        assert!(text.contains("max_inflight"));
        assert!(text.contains("[logging]"));
    }

    #[test]
    fn roundtrip_config() {
        let text = CliConfig::default().to_toml().unwrap();
        let parsed = CliConfig::parse(&text).unwrap();
        assert_eq!(parsed.client.request_timeout_ms, 5_000);
        assert_eq!(parsed.client.max_inflight, 30);
        assert_eq!(parsed.logging.level, "info");
        assert!(!parsed.tls.enabled);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let parsed = CliConfig::parse(
            r#"
            [client]
            addr = "game.example.com:3014"
            max_inflight = 4

            [client.handshake]
            client_version = "2.1.0"

            [tls]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(parsed.client.addr, "game.example.com:3014");
        assert_eq!(parsed.client.max_inflight, 4);
        assert_eq!(parsed.client.request_timeout_ms, 5_000);
        assert_eq!(parsed.client.handshake.client_version, "2.1.0");
        assert!(parsed.tls.enabled);
        assert!(!parsed.tls.insecure);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = CliConfig::load(Path::new("/nonexistent/stem-cli.toml"));
        assert_eq!(cfg.client.addr, ClientConfig::default().addr);
    }

    #[test]
    fn write_default_then_load() {
        let path = std::env::temp_dir().join(format!("stem-cli-{}.toml", std::process::id()));
        CliConfig::write_default(&path).unwrap();
        let cfg = CliConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.client.reaper_interval_ms, 1_000);
    }
}
