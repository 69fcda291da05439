//! Bus endpoint configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Configuration for the TCP bus endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Address to listen on; empty means all interfaces
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// TCP port to listen on
    pub port: u16,
    /// Socket read timeout, also the shutdown polling interval of the rx loop
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Outbound queue polling interval of the tx loop
    #[serde(default = "default_send_poll")]
    pub send_poll_ms: u64,
    /// Maximum number of frames read from the socket at once
    #[serde(default = "default_recv_chunk_frames")]
    pub recv_chunk_frames: usize,
    /// Disable Nagle's algorithm on the accepted socket
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_read_timeout() -> u64 {
    500
}

fn default_send_poll() -> u64 {
    20
}

fn default_recv_chunk_frames() -> usize {
    20
}

fn default_nodelay() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: 0,
            read_timeout_ms: default_read_timeout(),
            send_poll_ms: default_send_poll(),
            recv_chunk_frames: default_recv_chunk_frames(),
            nodelay: default_nodelay(),
        }
    }
}

impl BusConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| BusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BusError> {
        if self.read_timeout_ms == 0 {
            return Err(BusError::Config("read_timeout_ms must be > 0".into()));
        }
        if self.send_poll_ms == 0 {
            return Err(BusError::Config("send_poll_ms must be > 0".into()));
        }
        if self.recv_chunk_frames == 0 {
            return Err(BusError::Config("recv_chunk_frames must be > 0".into()));
        }
        Ok(())
    }

    /// Host to bind, mapping the empty string to all interfaces
    pub fn bind_host(&self) -> &str {
        if self.hostname.is_empty() {
            "0.0.0.0"
        } else {
            &self.hostname
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn send_poll(&self) -> Duration {
        Duration::from_millis(self.send_poll_ms)
    }

    pub fn channel_info(&self) -> String {
        format!("tcpbus port: {} hostname: {}", self.port, self.hostname)
    }
}
