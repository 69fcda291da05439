//! Inbound buffer between the rx loop and the bus handle
//!
//! The receiver lock is only taken for non-blocking pops, so a task parked
//! in [`InboundReceiver::recv`] never holds it. Waiters sleep on a `Notify`
//! that the sender signals on every push and once more when it is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tcpcan_core::CanMessage;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Notify;

pub(crate) fn channel() -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let arrived = Arc::new(Notify::new());
    (
        InboundSender {
            tx: Some(tx),
            arrived: arrived.clone(),
        },
        InboundReceiver {
            rx: Mutex::new(rx),
            arrived,
        },
    )
}

/// Pushing half, owned by the rx loop
pub(crate) struct InboundSender {
    tx: Option<mpsc::UnboundedSender<CanMessage>>,
    arrived: Arc<Notify>,
}

impl InboundSender {
    /// Queue a message; fails once the receiving half is gone
    pub(crate) fn send(&self, msg: CanMessage) -> Result<(), CanMessage> {
        let Some(tx) = &self.tx else {
            return Err(msg);
        };
        tx.send(msg).map_err(|e| e.0)?;
        self.arrived.notify_waiters();
        Ok(())
    }
}

impl Drop for InboundSender {
    fn drop(&mut self) {
        // Close the channel before waking waiters so they observe it closed
        self.tx.take();
        self.arrived.notify_waiters();
    }
}

/// Popping half, owned by the bus handle and usable through `&self`
pub(crate) struct InboundReceiver {
    rx: Mutex<mpsc::UnboundedReceiver<CanMessage>>,
    arrived: Arc<Notify>,
}

impl InboundReceiver {
    /// Next message, or `None` once the sender is gone and the buffer is empty
    pub(crate) async fn recv(&self) -> Option<CanMessage> {
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed
            notified.as_mut().enable();

            let next = self.rx.lock().try_recv();
            match next {
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            notified.await;
        }
    }

    /// Discard everything queued right now, returning how many were dropped
    pub(crate) fn clear(&self) -> usize {
        let mut rx = self.rx.lock();
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
