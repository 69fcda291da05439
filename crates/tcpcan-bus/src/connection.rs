//! Connection lifecycle and shutdown protocol
//!
//! The rx and tx loops cannot be cancelled while they sit in a blocking
//! read or write, so shutdown is cooperative: a shared flag is checked at
//! every timeout boundary, and the socket itself is shut down to force any
//! pending I/O to fail immediately. This is the standard way to cancel a
//! blocking read when the I/O call has no cancellation of its own.

use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of the bus endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Bound and waiting for the peer
    Listening = 0,
    /// Peer accepted, loops running
    Connected = 1,
    /// Shut down locally or closed by the peer
    Disconnected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Listening,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listening => write!(f, "listening"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// State shared between the manager and both I/O loops
pub(crate) struct Link {
    state: AtomicU8,
    shutdown: AtomicBool,
    /// Duplicate handle of the peer socket, used only to force it closed
    control: Mutex<Option<std::net::TcpStream>>,
}

impl Link {
    pub(crate) fn new(control: Option<std::net::TcpStream>) -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connected as u8),
            shutdown: AtomicBool::new(false),
            control: Mutex::new(control),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn mark_disconnected(&self) {
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::SeqCst);
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// True while both loops should keep going
    pub(crate) fn is_running(&self) -> bool {
        !self.is_shutting_down() && self.state() == ConnectionState::Connected
    }

    /// Shut down both directions of the socket and release the control handle
    ///
    /// Pending and future reads/writes on either half fail or return EOF.
    pub(crate) fn close_socket(&self) {
        if let Some(stream) = self.control.lock().take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                // NotConnected when the peer already went away
                debug!(%e, "Socket shutdown");
            }
        }
    }
}

struct Workers {
    rx: JoinHandle<()>,
    tx: JoinHandle<()>,
}

/// Owns the peer connection and the two I/O loop tasks
pub struct ConnectionManager {
    link: Arc<Link>,
    workers: tokio::sync::Mutex<Option<Workers>>,
}

impl ConnectionManager {
    pub(crate) fn new(link: Arc<Link>, rx: JoinHandle<()>, tx: JoinHandle<()>) -> Self {
        Self {
            link,
            workers: tokio::sync::Mutex::new(Some(Workers { rx, tx })),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop both loops and close the connection
    ///
    /// Raises the shutdown flag, shuts the socket down in both directions,
    /// waits for both loops to finish and marks the connection
    /// disconnected. A call made while another is in progress waits for
    /// that one to finish; once the loops are reaped further calls return
    /// immediately.
    pub async fn shutdown(&self) {
        // Held across the joins so concurrent callers queue behind it
        let mut workers = self.workers.lock().await;
        let Some(Workers { rx, tx }) = workers.take() else {
            return;
        };

        if self.link.state() == ConnectionState::Connected {
            info!("Shutting down TCP bus connection");
        } else {
            debug!("Reaping I/O loops of a closed connection");
        }

        self.link.request_shutdown();
        self.link.close_socket();

        if let Err(e) = rx.await {
            warn!(%e, "Receive loop terminated abnormally");
        }
        if let Err(e) = tx.await {
            warn!(%e, "Transmit loop terminated abnormally");
        }

        self.link.mark_disconnected();
        debug!("TCP bus shutdown complete");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Loops notice within one timeout interval and exit on their own
        self.link.request_shutdown();
        self.link.close_socket();
    }
}
