//! Daemon configuration file
//!
//! ```toml
//! [server]
//! hostname = "0.0.0.0"
//! port = 29536
//! channel = "vcan0"        # optional: bridge to a local interface
//!
//! [client]
//! channel = "can0"
//! hostname = "192.168.1.10"
//! port = 29536
//! use_unordered_map = true
//! limit_recv_rate_hz = 100
//!
//! [[client.filters]]
//! can_id = 0x7E8
//! can_mask = 0x7F8
//! extended = false
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tcpcan_bus::BusConfig;
use tcpcan_client::{ClientConfig, InterfaceKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub client: Option<ClientConfig>,
}

/// Bus endpoint plus the optional local interface it is bridged to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub bus: BusConfig,
    /// Local CAN channel; without one, received frames are only logged
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub interface: InterfaceKind,
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if let Some(server) = &config.server {
            server.bus.validate()?;
        }
        if let Some(client) = &config.client {
            client.validate()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tcpcan_client::CanFilter;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_both_sections() {
        let file = write_config(
            r#"
            [server]
            port = 29536
            channel = "vcan0"
            interface = "mock"

            [client]
            channel = "can0"
            hostname = "10.0.0.1"
            port = 29536
            use_unordered_map = true
            limit_recv_rate_hz = 100

            [[client.filters]]
            can_id = 0x7E8
            can_mask = 0x7F8
            extended = false
            "#,
        );
        let config = DaemonConfig::load(file.path()).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.bus.port, 29536);
        assert_eq!(server.bus.hostname, "0.0.0.0");
        assert_eq!(server.channel.as_deref(), Some("vcan0"));
        assert_eq!(server.interface, InterfaceKind::Mock);

        let client = config.client.unwrap();
        assert_eq!(client.channel, "can0");
        assert!(client.use_unordered_map);
        assert_eq!(client.limit_recv_rate_hz, Some(100));
        assert_eq!(
            client.filters,
            vec![CanFilter::new(0x7E8, 0x7F8).extended(false)]
        );
    }

    #[test]
    fn test_server_only() {
        let file = write_config("[server]\nport = 1234\nread_timeout_ms = 50\n");
        let config = DaemonConfig::load(file.path()).unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.bus.read_timeout_ms, 50);
        assert!(server.channel.is_none());
        assert!(config.client.is_none());
    }

    #[test]
    fn test_invalid_client_rejected() {
        let file = write_config(
            "[client]\nchannel = \"can0\"\nhostname = \"h\"\nport = 1\nlimit_recv_rate_hz = 0\n",
        );
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(DaemonConfig::load("/nonexistent/tcpcand.toml").is_err());
    }
}
