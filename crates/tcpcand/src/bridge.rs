//! Server side of the daemon
//!
//! Pumps frames between an accepted [`TcpBus`] and an optional local CAN
//! interface. Without an interface every frame from the peer is logged.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tcpcan_bus::{BusError, TcpBus};
use tcpcan_client::CanInterface;
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(50);

/// Frames moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub bus_to_can: u64,
    pub can_to_bus: u64,
}

/// Run until the peer disconnects or `shutdown` resolves, then close the bus
pub async fn serve<F>(
    bus: &TcpBus,
    interface: Option<Arc<dyn CanInterface>>,
    shutdown: F,
) -> BridgeStats
where
    F: Future<Output = ()>,
{
    let running = AtomicBool::new(true);
    let interface = interface.as_deref();

    let (bus_to_can, can_to_bus, ()) = tokio::join!(
        bus_to_can(bus, interface, &running),
        can_to_bus(bus, interface, &running),
        async {
            tokio::select! {
                _ = shutdown => {
                    info!("Shutdown requested");
                    running.store(false, Ordering::SeqCst);
                }
                _ = stopped(&running) => {}
            }
        }
    );

    bus.shutdown().await;
    let stats = BridgeStats {
        bus_to_can,
        can_to_bus,
    };
    info!(?stats, "Bridge stopped");
    stats
}

async fn stopped(running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(POLL).await;
    }
}

async fn bus_to_can(
    bus: &TcpBus,
    interface: Option<&dyn CanInterface>,
    running: &AtomicBool,
) -> u64 {
    let mut count = 0;
    while running.load(Ordering::SeqCst) {
        let Some(msg) = bus.receive(Some(POLL)).await else {
            if !bus.is_connected() {
                info!(peer = %bus.peer_addr(), "Peer disconnected");
                break;
            }
            continue;
        };
        match interface {
            Some(iface) => match iface.send(&msg).await {
                Ok(()) => count += 1,
                Err(e) => warn!(%e, frame = %msg, "CAN send failed"),
            },
            None => {
                info!(frame = %msg, timestamp = msg.timestamp, "Received");
                count += 1;
            }
        }
    }
    running.store(false, Ordering::SeqCst);
    count
}

async fn can_to_bus(
    bus: &TcpBus,
    interface: Option<&dyn CanInterface>,
    running: &AtomicBool,
) -> u64 {
    let Some(iface) = interface else {
        return 0;
    };
    let mut count = 0;
    while running.load(Ordering::SeqCst) {
        let msg = match iface.recv(POLL).await {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) => {
                warn!(%e, channel = %iface.name(), "CAN receive failed");
                break;
            }
        };
        match bus.send(msg) {
            Ok(()) => count += 1,
            Err(BusError::NotConnected) => break,
            Err(e) => {
                warn!(%e, "Bus send failed");
                break;
            }
        }
    }
    running.store(false, Ordering::SeqCst);
    debug!(count, "CAN -> bus pump stopped");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tcpcan_bus::{BusConfig, BusListener};
    use tcpcan_client::{CanMessage, MockCanInterface};
    use tcpcan_core::{decode, encode, FRAME_SIZE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    const WAIT: Duration = Duration::from_secs(2);

    async fn connected_pair() -> (TcpBus, TcpStream) {
        let listener = BusListener::bind(BusConfig {
            read_timeout_ms: 50,
            send_poll_ms: 10,
            ..BusConfig::new("127.0.0.1", 0)
        })
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(listener.accept());
        let peer = TcpStream::connect(addr).await.unwrap();
        (accept.await.unwrap().unwrap(), peer)
    }

    #[tokio::test]
    async fn test_bridges_both_directions_until_shutdown() {
        let (bus, mut peer) = connected_pair().await;
        let iface = Arc::new(MockCanInterface::new("mock0"));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let from_peer = CanMessage::new(0x321, &[1, 2, 3]).unwrap().with_timestamp(3.5);
        let from_can = CanMessage::new_extended(0x1F00_0001, &[4]).unwrap().with_timestamp(4.0);

        let driver = {
            let iface = iface.clone();
            let from_peer = from_peer.clone();
            let from_can = from_can.clone();
            async move {
                peer.write_all(&encode(&from_peer)).await.unwrap();
                iface.inject(from_can.clone());

                let mut frame = [0u8; FRAME_SIZE];
                tokio::time::timeout(WAIT, peer.read_exact(&mut frame))
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(decode(&frame).unwrap(), from_can);

                while iface.sent().is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                stop_tx.send(()).unwrap();
                peer
            }
        };

        let iface_dyn: Arc<dyn CanInterface> = iface.clone();
        let (stats, _peer) = tokio::join!(
            serve(&bus, Some(iface_dyn), async {
                let _ = stop_rx.await;
            }),
            driver
        );

        assert_eq!(iface.sent(), vec![from_peer]);
        assert_eq!(
            stats,
            BridgeStats {
                bus_to_can: 1,
                can_to_bus: 1
            }
        );
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn test_monitor_mode_stops_on_peer_disconnect() {
        let (bus, mut peer) = connected_pair().await;
        let msg = CanMessage::new(0x100, &[0xFF]).unwrap().with_timestamp(1.0);
        peer.write_all(&encode(&msg)).await.unwrap();
        drop(peer);

        let stats = tokio::time::timeout(WAIT, serve(&bus, None, std::future::pending()))
            .await
            .expect("bridge kept running after the peer left");
        assert_eq!(stats.bus_to_can, 1);
        assert_eq!(stats.can_to_bus, 0);
    }
}
