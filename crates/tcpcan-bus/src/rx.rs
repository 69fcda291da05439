//! Receive loop: socket -> inbound buffer

use std::sync::Arc;
use std::time::Duration;

use tcpcan_core::{decode, CanMessage, FrameAssembler, FRAME_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace, warn};

use crate::connection::Link;
use crate::inbound::InboundSender;

/// Read frames from the peer until shutdown, EOF or an I/O error
///
/// Frames split across reads are reassembled; decoded messages are pushed
/// in arrival order. On exit the connection is marked disconnected.
pub(crate) async fn receive_loop<R>(
    mut reader: R,
    link: Arc<Link>,
    inbound: InboundSender,
    read_timeout: Duration,
    chunk_frames: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; FRAME_SIZE * chunk_frames];
    let mut assembler = FrameAssembler::new();

    while link.is_running() {
        let n = match tokio::time::timeout(read_timeout, reader.read(&mut buf)).await {
            // No data yet, check the flag again
            Err(_) => continue,
            Ok(Ok(0)) => {
                if link.is_shutting_down() {
                    debug!("Receive loop: socket closed by shutdown");
                } else {
                    info!("Peer closed the connection");
                }
                link.close_socket();
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                if link.is_shutting_down() {
                    debug!(%e, "Receive loop: read interrupted by shutdown");
                } else {
                    warn!(%e, "Socket read failed");
                }
                link.close_socket();
                break;
            }
        };

        let frames = assembler.push(&buf[..n]);
        trace!(
            bytes = n,
            frames = frames.len(),
            pending = assembler.pending(),
            "Received data"
        );

        for frame in &frames {
            match decode(frame) {
                Ok(msg) => {
                    if inbound.send(msg).is_err() {
                        // Bus handle dropped, nobody left to deliver to
                        debug!("Inbound buffer closed, stopping receive loop");
                        link.mark_disconnected();
                        return;
                    }
                }
                Err(e) => warn!(%e, "Dropping malformed frame"),
            }
        }
    }

    link.mark_disconnected();
    debug!("Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use pretty_assertions::assert_eq;
    use tcpcan_core::encode;

    fn frames(count: u32) -> (Vec<CanMessage>, Vec<u8>) {
        let msgs: Vec<CanMessage> = (0..count)
            .map(|i| {
                CanMessage::new_extended(0x18DA_0000 + i, &[i as u8, 0xAA])
                    .unwrap()
                    .with_timestamp(100.5 + i as f64)
            })
            .collect();
        let bytes = msgs.iter().flat_map(encode).collect();
        (msgs, bytes)
    }

    async fn run(reader: tokio_test::io::Mock) -> (Vec<CanMessage>, Arc<Link>) {
        let link = Arc::new(Link::new(None));
        let (tx, rx) = crate::inbound::channel();
        receive_loop(reader, link.clone(), tx, Duration::from_millis(50), 20).await;

        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        (out, link)
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let (msgs, bytes) = frames(4);
        let reader = tokio_test::io::Builder::new()
            .read(&bytes[..7])
            .read(&bytes[7..30])
            .read(&bytes[30..63])
            .read(&bytes[63..])
            .build();

        let (received, link) = run(reader).await;
        assert_eq!(received, msgs);
        // Mock reaches EOF after the last read
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_single_read_matches_split_reads() {
        let (msgs, bytes) = frames(3);
        let reader = tokio_test::io::Builder::new().read(&bytes).build();

        let (received, _) = run(reader).await;
        assert_eq!(received, msgs);
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_is_not_delivered() {
        let (msgs, bytes) = frames(2);
        let reader = tokio_test::io::Builder::new()
            .read(&bytes[..FRAME_SIZE + 10])
            .build();

        let (received, _) = run(reader).await;
        assert_eq!(received, msgs[..1].to_vec());
    }

    #[tokio::test]
    async fn test_bad_dlc_frame_is_skipped() {
        let (msgs, mut bytes) = frames(3);
        bytes[FRAME_SIZE + 12] = 0xFF;
        let reader = tokio_test::io::Builder::new().read(&bytes).build();

        let (received, _) = run(reader).await;
        assert_eq!(received, vec![msgs[0].clone(), msgs[2].clone()]);
    }

    #[tokio::test]
    async fn test_read_error_ends_loop() {
        let (msgs, bytes) = frames(1);
        let reader = tokio_test::io::Builder::new()
            .read(&bytes)
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();

        let (received, link) = run(reader).await;
        assert_eq!(received, msgs);
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_exits_immediately_when_shut_down() {
        let link = Arc::new(Link::new(None));
        link.request_shutdown();
        let (tx, _rx) = crate::inbound::channel();
        let reader = tokio_test::io::Builder::new().build();

        receive_loop(reader, link.clone(), tx, Duration::from_millis(50), 20).await;
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}
