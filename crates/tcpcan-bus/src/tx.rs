//! Transmit loop: outbound buffer -> socket

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tcpcan_core::{encode_into, CanMessage, FRAME_SIZE};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::connection::Link;

/// Write queued messages to the peer until shutdown or a write error
///
/// Whenever a message is available, everything else already queued is
/// drained with it and sent in one write. A lone message is sent right away.
pub(crate) async fn transmit_loop<W>(
    mut writer: W,
    link: Arc<Link>,
    mut outbound: mpsc::UnboundedReceiver<CanMessage>,
    poll_interval: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let mut batch = BytesMut::with_capacity(FRAME_SIZE * 32);

    while link.is_running() {
        let first = match tokio::time::timeout(poll_interval, outbound.recv()).await {
            Err(_) => continue,
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("Outbound buffer closed, stopping transmit loop");
                break;
            }
        };

        batch.clear();
        encode_into(&first, &mut batch);
        let mut count = 1usize;
        while let Ok(msg) = outbound.try_recv() {
            encode_into(&msg, &mut batch);
            count += 1;
        }

        trace!(frames = count, bytes = batch.len(), "Sending batch");

        if let Err(e) = writer.write_all(&batch).await {
            if link.is_shutting_down() {
                debug!(%e, "Transmit loop: write interrupted by shutdown");
            } else {
                warn!(%e, frames = count, "Socket write failed");
            }
            link.close_socket();
            link.mark_disconnected();
            break;
        }
    }

    debug!("Transmit loop stopped");
}
