//! tcpcan-bus - TCP-side CAN bus endpoint
//!
//! Listens on a TCP port, accepts exactly one peer and exchanges CAN frames
//! with it using the fixed 21-byte wire format from `tcpcan-core`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         TcpBus                           │
//! │   send() ──► outbound ──► tx loop ──┐                    │
//! │                                     ├──► socket ◄──► peer│
//! │   receive() ◄── inbound ◄── rx loop ┘                    │
//! │                                                          │
//! │   ConnectionManager: state, shutdown flag, join handles  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tcpcan_bus::{BusConfig, TcpBus};
//!
//! let bus = TcpBus::bind(BusConfig::new("0.0.0.0", 5500)).await?;
//! while let Some(msg) = bus.receive(Some(Duration::from_secs(1))).await {
//!     bus.send(msg)?;
//! }
//! bus.shutdown().await;
//! ```

pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
mod inbound;
mod rx;
mod tx;

pub use bus::{BusListener, TcpBus};
pub use config::BusConfig;
pub use connection::ConnectionState;
pub use error::BusError;

pub use tcpcan_core::CanMessage;
