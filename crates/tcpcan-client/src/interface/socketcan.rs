//! SocketCAN interface (Linux only)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{
    CanFilter as KernelFilter, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket,
    SocketOptions, StandardId,
};
use tcpcan_core::{pack_filters, CanFilter, CanMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::CanInterface;
use crate::error::ClientError;

/// Raw CAN socket on a SocketCAN channel
pub struct SocketCanInterface {
    name: String,
    socket: Arc<Mutex<CanSocket>>,
    running: Arc<AtomicBool>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanMessage>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SocketCanInterface {
    /// Open `channel` with `filters` installed in the kernel
    ///
    /// An empty filter list installs the match-all filter.
    pub fn open(channel: &str, filters: &[CanFilter]) -> Result<Self, ClientError> {
        let socket = CanSocket::open(channel).map_err(|e| {
            ClientError::Interface(format!("Failed to open CAN socket on {}: {}", channel, e))
        })?;

        let kernel = kernel_filters(filters);
        socket.set_filters(&kernel).map_err(|e| {
            ClientError::Interface(format!("Failed to set filters on {}: {}", channel, e))
        })?;
        debug!(%channel, count = kernel.len(), "Kernel CAN filters installed");

        // Non-blocking so the listener never holds the lock while idle
        socket.set_nonblocking(true).map_err(|e| {
            ClientError::Interface(format!("Failed to set non-blocking: {}", e))
        })?;

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let iface = Self {
            name: channel.to_string(),
            socket: Arc::new(Mutex::new(socket)),
            running: Arc::new(AtomicBool::new(true)),
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            listener_handle: Mutex::new(None),
        };
        iface.start_listener(incoming_tx);

        Ok(iface)
    }

    fn start_listener(&self, incoming_tx: mpsc::UnboundedSender<CanMessage>) {
        let socket = self.socket.clone();
        let running = self.running.clone();
        let name = self.name.clone();

        let handle = tokio::task::spawn_blocking(move || {
            while running.load(Ordering::SeqCst) {
                let result = socket.lock().read_frame();
                match result {
                    Ok(frame) => {
                        let Some(msg) = frame_to_message(&frame) else {
                            continue;
                        };
                        if incoming_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => {
                        error!(channel = %name, ?e, "SocketCAN read error");
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            debug!(channel = %name, "SocketCAN listener stopped");
        });

        *self.listener_handle.lock() = Some(handle);
    }
}

/// `(can_id, can_mask)` pairs for `CAN_RAW_FILTER`
///
/// Packed filters already use the kernel layout, `CAN_EFF_FLAG` in bit 31.
fn kernel_filter_ids(filters: &[CanFilter]) -> Vec<(u32, u32)> {
    pack_filters(filters)
        .into_iter()
        .map(|f| (f.can_id, f.can_mask))
        .collect()
}

fn kernel_filters(filters: &[CanFilter]) -> Vec<KernelFilter> {
    kernel_filter_ids(filters)
        .into_iter()
        .map(|(id, mask)| KernelFilter::new(id, mask))
        .collect()
}

fn frame_to_message(frame: &CanFrame) -> Option<CanMessage> {
    let data = frame.data();
    if data.len() > tcpcan_core::MAX_DLC {
        return None;
    }
    let mut msg = CanMessage {
        timestamp: 0.0,
        arbitration_id: frame.raw_id(),
        is_extended_id: frame.is_extended(),
        is_remote_frame: frame.is_remote_frame(),
        is_error_frame: frame.is_error_frame(),
        dlc: data.len() as u8,
        data: data.to_vec(),
    };
    if msg.is_remote_frame {
        msg.dlc = frame.dlc() as u8;
        msg.data = vec![0; msg.dlc as usize];
    }
    msg.stamp_now();
    Some(msg)
}

fn message_to_frame(msg: &CanMessage) -> Result<CanFrame, ClientError> {
    if msg.is_error_frame {
        return Err(ClientError::Interface(
            "error frames cannot be transmitted".to_string(),
        ));
    }
    let invalid = || ClientError::Interface(format!("Invalid CAN ID 0x{:X}", msg.arbitration_id));

    let frame = if msg.is_extended_id {
        let id = ExtendedId::new(msg.arbitration_id).ok_or_else(invalid)?;
        if msg.is_remote_frame {
            CanFrame::new_remote(id, msg.dlc as usize)
        } else {
            CanFrame::new(id, &msg.data)
        }
    } else {
        let id = u16::try_from(msg.arbitration_id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(invalid)?;
        if msg.is_remote_frame {
            CanFrame::new_remote(id, msg.dlc as usize)
        } else {
            CanFrame::new(id, &msg.data)
        }
    };

    frame.ok_or_else(|| ClientError::Interface(format!("Cannot build CAN frame from {}", msg)))
}

#[async_trait]
impl CanInterface for SocketCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<CanMessage>, ClientError> {
        let mut rx = self.incoming_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(ClientError::Interface(format!(
                "{}: listener stopped",
                self.name
            ))),
            Err(_) => Ok(None),
        }
    }

    async fn send(&self, msg: &CanMessage) -> Result<(), ClientError> {
        let frame = message_to_frame(msg)?;
        let socket = self.socket.clone();

        tokio::task::spawn_blocking(move || loop {
            let result = socket.lock().write_frame(&frame);
            match result {
                Ok(()) => return Ok(()),
                // TX queue full, retry shortly
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(ClientError::Interface(e.to_string())),
            }
        })
        .await
        .map_err(|e| ClientError::Interface(format!("Task join error: {}", e)))?
        .inspect_err(|e| warn!(channel = %self.name, %e, "CAN write failed"))
    }
}

impl Drop for SocketCanInterface {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
