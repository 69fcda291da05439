//! Mock CAN interface for testing

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tcpcan_core::CanMessage;
use tokio::sync::mpsc;

use super::CanInterface;
use crate::error::ClientError;

/// Channel-backed CAN interface
///
/// Frames passed to [`inject`](Self::inject) come out of `recv`; frames
/// written with `send` are recorded and can be inspected with
/// [`sent`](Self::sent).
pub struct MockCanInterface {
    name: String,
    incoming_tx: mpsc::UnboundedSender<CanMessage>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanMessage>>,
    sent: Mutex<Vec<CanMessage>>,
    fail_sends: Mutex<bool>,
}

impl MockCanInterface {
    pub fn new(name: &str) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            sent: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
        }
    }

    /// Simulate a frame arriving from the bus
    pub fn inject(&self, msg: CanMessage) {
        let _ = self.incoming_tx.send(msg);
    }

    /// Frames written to the bus so far
    pub fn sent(&self) -> Vec<CanMessage> {
        self.sent.lock().clone()
    }

    /// Make subsequent sends fail
    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock() = fail;
    }
}

#[async_trait]
impl CanInterface for MockCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<CanMessage>, ClientError> {
        let mut rx = self.incoming_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(mut msg)) => {
                if msg.timestamp == 0.0 {
                    msg.stamp_now();
                }
                Ok(Some(msg))
            }
            // Sender lives in self, so the channel never closes
            Ok(None) | Err(_) => Ok(None),
        }
    }

    async fn send(&self, msg: &CanMessage) -> Result<(), ClientError> {
        if *self.fail_sends.lock() {
            return Err(ClientError::Interface("mock send failure".to_string()));
        }
        tracing::debug!(frame = %msg, "Mock interface: sent frame");
        self.sent.lock().push(msg.clone());
        Ok(())
    }
}
