//! tcpcan-client - CAN side of the CAN-over-TCP bridge
//!
//! Reads frames from a local CAN interface, filters them, and streams them
//! to a `tcpcan-bus` endpoint; frames arriving from the endpoint are written
//! back onto the interface.
//!
//! - [`interface`]: the [`CanInterface`] abstraction (SocketCAN, mock)
//! - [`forwarder`]: [`TcpClient`], the forwarding loops
//! - [`outbox`]: FIFO or latest-per-identifier buffering with rate capping
//! - [`supervisor`]: [`ClientProcess`], runs the client as a child process

pub mod config;
pub mod error;
pub mod forwarder;
pub mod interface;
pub mod outbox;
pub mod supervisor;

pub use config::{ClientConfig, InterfaceKind};
pub use error::ClientError;
pub use forwarder::{ForwardStats, TcpClient};
pub use interface::{create_interface, CanInterface, MockCanInterface};
pub use supervisor::ClientProcess;

pub use tcpcan_core::{CanFilter, CanMessage};
