//! Client configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tcpcan_core::CanFilter;

use crate::error::ClientError;

/// Which CAN interface implementation backs the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Linux SocketCAN raw socket
    #[default]
    SocketCan,
    /// In-process mock, for tests and demos
    Mock,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SocketCan => "socketcan",
            Self::Mock => "mock",
        }
    }
}

impl std::str::FromStr for InterfaceKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socketcan" => Ok(Self::SocketCan),
            "mock" => Ok(Self::Mock),
            other => Err(ClientError::Config(format!(
                "unknown interface kind '{}'",
                other
            ))),
        }
    }
}

/// Configuration for the CAN-side client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// CAN channel name (e.g., "can0", "vcan0")
    pub channel: String,
    /// Interface implementation
    #[serde(default)]
    pub interface: InterfaceKind,
    /// Bus endpoint host
    pub hostname: String,
    /// Bus endpoint port
    pub port: u16,
    /// Identifier filters; empty accepts everything
    #[serde(default)]
    pub filters: Vec<CanFilter>,
    /// Keep only the newest unsent frame per identifier
    #[serde(default)]
    pub use_unordered_map: bool,
    /// Maximum flush rate towards the bus endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_recv_rate_hz: Option<u32>,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Connection attempts before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Delay between connection attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Poll interval of both forwarding loops in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    20
}

impl ClientConfig {
    pub fn new(channel: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            channel: channel.into(),
            interface: InterfaceKind::default(),
            hostname: hostname.into(),
            port,
            filters: Vec::new(),
            use_unordered_map: false,
            limit_recv_rate_hz: None,
            connect_timeout_ms: default_connect_timeout(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay(),
            poll_interval_ms: default_poll_interval(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.channel.is_empty() {
            return Err(ClientError::Config("channel must not be empty".into()));
        }
        if self.limit_recv_rate_hz == Some(0) {
            return Err(ClientError::Config(
                "limit_recv_rate_hz must be > 0 when set".into(),
            ));
        }
        if self.connect_attempts == 0 {
            return Err(ClientError::Config("connect_attempts must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ClientError::Config("poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Minimum time between two flushes, if rate limited
    pub fn min_flush_interval(&self) -> Option<Duration> {
        self.limit_recv_rate_hz
            .filter(|hz| *hz > 0)
            .map(|hz| Duration::from_secs_f64(1.0 / hz as f64))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Command-line arguments for `tcpcand client` reproducing this config
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "client".to_string(),
            "--channel".to_string(),
            self.channel.clone(),
            "--interface".to_string(),
            self.interface.as_str().to_string(),
            "--host".to_string(),
            self.hostname.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        for filter in &self.filters {
            args.push("--filter".to_string());
            args.push(format_filter(filter));
        }
        if self.use_unordered_map {
            args.push("--unordered".to_string());
        }
        if let Some(hz) = self.limit_recv_rate_hz {
            args.push("--rate-hz".to_string());
            args.push(hz.to_string());
        }
        args
    }
}

fn format_filter(filter: &CanFilter) -> String {
    let base = format!("0x{:X}:0x{:X}", filter.can_id, filter.can_mask);
    match filter.extended {
        Some(true) => format!("{}:ext", base),
        Some(false) => format!("{}:std", base),
        None => base,
    }
}
