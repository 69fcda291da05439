//! Public bus interface

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tcpcan_core::CanMessage;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::connection::{ConnectionManager, ConnectionState, Link};
use crate::error::BusError;
use crate::inbound::{self, InboundReceiver};
use crate::rx::receive_loop;
use crate::tx::transmit_loop;

/// A bound endpoint waiting for its single peer
pub struct BusListener {
    config: BusConfig,
    listener: TcpListener,
}

impl BusListener {
    /// Bind the configured address with a backlog of one
    pub async fn bind(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        let addr_str = format!("{}:{}", config.bind_host(), config.port);
        let bind_err = |source| BusError::Bind {
            addr: addr_str.clone(),
            source,
        };

        let addr = tokio::net::lookup_host((config.bind_host(), config.port))
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "hostname did not resolve",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(1).map_err(bind_err)?;

        let local = listener.local_addr()?;
        info!(addr = %local, "TCP bus listening");
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.listener.local_addr()?)
    }

    /// Always [`ConnectionState::Listening`]
    ///
    /// Owning a `BusListener` means no peer has been accepted yet; `accept`
    /// consumes it and the returned [`TcpBus`] reports the state from then on.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::Listening
    }

    /// Wait for the peer, then start both I/O loops
    ///
    /// The listening socket is closed once the peer is accepted; further
    /// connection attempts are refused.
    pub async fn accept(self) -> Result<TcpBus, BusError> {
        let (stream, peer) = self.listener.accept().await.map_err(BusError::Accept)?;
        info!(%peer, "TCP bus peer connected");
        TcpBus::start(self.config, stream, peer)
    }
}

/// CAN bus endpoint backed by a single TCP peer
pub struct TcpBus {
    config: BusConfig,
    peer: SocketAddr,
    manager: ConnectionManager,
    outbound: mpsc::UnboundedSender<CanMessage>,
    inbound: InboundReceiver,
}

impl TcpBus {
    /// Bind, then block until exactly one peer connects
    pub async fn bind(config: BusConfig) -> Result<Self, BusError> {
        BusListener::bind(config).await?.accept().await
    }

    fn start(config: BusConfig, stream: TcpStream, peer: SocketAddr) -> Result<Self, BusError> {
        stream.set_nodelay(config.nodelay)?;

        // Keep a duplicate of the socket so shutdown can force pending I/O to
        // fail even while the loops own the read and write halves.
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;
        let (reader, writer) = stream.into_split();

        let link = Arc::new(Link::new(Some(control)));
        let (inbound_tx, inbound_rx) = inbound::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let rx = tokio::spawn(receive_loop(
            reader,
            link.clone(),
            inbound_tx,
            config.read_timeout(),
            config.recv_chunk_frames,
        ));
        let tx = tokio::spawn(transmit_loop(
            writer,
            link.clone(),
            outbound_rx,
            config.send_poll(),
        ));

        debug!(%peer, "TCP bus I/O loops started");

        Ok(Self {
            config,
            peer,
            manager: ConnectionManager::new(link, rx, tx),
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    /// Queue a message for the peer
    ///
    /// The outbound buffer is unbounded, so this never waits. Flag bits are
    /// packed into the identifier when the message is encoded.
    pub fn send(&self, msg: CanMessage) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.outbound.send(msg).map_err(|_| BusError::NotConnected)
    }

    /// Take the next message from the peer
    ///
    /// Waits up to `timeout` (forever with `None`). Returns `None` on
    /// timeout, or once the connection is gone and the buffer is empty.
    /// A pending call holds no lock, so other callers are never blocked.
    pub async fn receive(&self, timeout: Option<Duration>) -> Option<CanMessage> {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.inbound.recv())
                .await
                .ok()
                .flatten(),
            None => self.inbound.recv().await,
        }
    }

    /// Drop every message waiting in the inbound buffer
    ///
    /// Returns how many messages were discarded.
    pub fn clear_receive_buffer(&self) -> usize {
        let dropped = self.inbound.clear();
        if dropped > 0 {
            debug!(dropped, "Cleared receive buffer");
        }
        dropped
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Gracefully close the connection and stop both I/O loops
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn channel_info(&self) -> String {
        self.config.channel_info()
    }
}
