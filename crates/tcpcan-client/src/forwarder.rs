//! CAN <-> TCP forwarding

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tcpcan_core::filter::{any_match, pack_filters, PackedFilter};
use tcpcan_core::{decode, encode_into, FrameAssembler, FRAME_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interface::CanInterface;
use crate::outbox::Outbox;

/// Frames read from the TCP stream per read call
const READ_CHUNK_FRAMES: usize = 20;

/// Counters describing what the forwarder has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Frames written to the TCP stream
    pub can_to_tcp: u64,
    /// Frames written to the CAN interface
    pub tcp_to_can: u64,
    /// Frames rejected by the identifier filters
    pub filtered: u64,
    /// Frames replaced by a newer one in unordered mode
    pub overwritten: u64,
}

#[derive(Default)]
struct Counters {
    can_to_tcp: AtomicU64,
    tcp_to_can: AtomicU64,
    filtered: AtomicU64,
    overwritten: AtomicU64,
}

/// Streams frames between a CAN interface and a `tcpcan-bus` endpoint
pub struct TcpClient {
    config: ClientConfig,
    interface: Arc<dyn CanInterface>,
    filters: Vec<PackedFilter>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl TcpClient {
    pub fn new(config: ClientConfig, interface: Arc<dyn CanInterface>) -> Result<Self, ClientError> {
        config.validate()?;
        let filters = pack_filters(&config.filters);
        Ok(Self {
            config,
            interface,
            filters,
            running: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Ask a running [`run`](Self::run) to return
    ///
    /// Both loops notice within one poll interval.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ForwardStats {
        ForwardStats {
            can_to_tcp: self.counters.can_to_tcp.load(Ordering::Relaxed),
            tcp_to_can: self.counters.tcp_to_can.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            overwritten: self.counters.overwritten.load(Ordering::Relaxed),
        }
    }

    /// Connect with retry
    async fn connect(&self) -> Result<TcpStream, ClientError> {
        let addr = self.config.address();
        let attempts = self.config.connect_attempts;
        let mut last_error = ClientError::Connect("No attempt".into());

        for attempt in 1..=attempts {
            info!(%addr, attempt, "Connecting to TCP bus");
            match tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
                .await
            {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_error = ClientError::Connect(format!("{}: {}", addr, e)),
                Err(_) => last_error = ClientError::Connect(format!("{}: timeout", addr)),
            }
            warn!(attempt, attempts, %last_error, "Connection failed");
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }
        Err(last_error)
    }

    /// Connect and forward until the server disconnects or [`stop`](Self::stop)
    pub async fn run(&self) -> Result<ForwardStats, ClientError> {
        let stream = self.connect().await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!(
            channel = %self.interface.name(),
            %peer,
            unordered = self.config.use_unordered_map,
            rate_hz = ?self.config.limit_recv_rate_hz,
            "Forwarding CAN traffic"
        );

        let (reader, writer) = stream.into_split();
        tokio::join!(self.can_to_tcp(writer), self.tcp_to_can(reader));

        let stats = self.stats();
        info!(?stats, "Forwarding stopped");
        Ok(stats)
    }

    async fn can_to_tcp<W>(&self, mut writer: W)
    where
        W: AsyncWrite + Unpin,
    {
        let poll = self.config.poll_interval();
        let mut outbox = Outbox::new(
            self.config.use_unordered_map,
            self.config.min_flush_interval(),
        );
        let mut batch = BytesMut::with_capacity(FRAME_SIZE * 32);
        let mut overwritten = 0;

        while self.is_running() {
            match self.interface.recv(poll).await {
                Ok(Some(msg)) => {
                    if any_match(&self.filters, &msg) {
                        outbox.push(msg);
                    } else {
                        self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%e, "CAN receive failed");
                    break;
                }
            }

            let newly_overwritten = outbox.overwritten() - overwritten;
            if newly_overwritten > 0 {
                overwritten = outbox.overwritten();
                self.counters
                    .overwritten
                    .fetch_add(newly_overwritten, Ordering::Relaxed);
            }

            let now = Instant::now();
            if !outbox.is_due(now) {
                continue;
            }

            let frames = outbox.take(now);
            batch.clear();
            for msg in &frames {
                encode_into(msg, &mut batch);
            }
            if let Err(e) = writer.write_all(&batch).await {
                warn!(%e, "TCP write failed");
                break;
            }
            self.counters
                .can_to_tcp
                .fetch_add(frames.len() as u64, Ordering::Relaxed);
        }

        self.stop();
        let _ = writer.shutdown().await;
        debug!("CAN -> TCP loop stopped");
    }

    async fn tcp_to_can<R>(&self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let poll = self.config.poll_interval();
        let mut buf = vec![0u8; FRAME_SIZE * READ_CHUNK_FRAMES];
        let mut assembler = FrameAssembler::new();

        while self.is_running() {
            let n = match tokio::time::timeout(poll, reader.read(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(0)) => {
                    info!("TCP bus closed the connection");
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(%e, "TCP read failed");
                    break;
                }
            };

            for frame in assembler.push(&buf[..n]) {
                let msg = match decode(&frame) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%e, "Dropping malformed frame");
                        continue;
                    }
                };
                match self.interface.send(&msg).await {
                    Ok(()) => {
                        self.counters.tcp_to_can.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(%e, frame = %msg, "CAN send failed"),
                }
            }
        }

        self.stop();
        debug!("TCP -> CAN loop stopped");
    }
}
