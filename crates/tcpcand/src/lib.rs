//! tcpcand - CAN-over-TCP bridge daemon
//!
//! - [`bridge`]: server mode, a [`tcpcan_bus::TcpBus`] pumped to a local
//!   interface or a frame log
//! - [`config`]: the `[server]` / `[client]` TOML file

pub mod bridge;
pub mod config;

pub use bridge::{serve, BridgeStats};
pub use config::{DaemonConfig, ServerConfig};
