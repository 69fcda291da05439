//! Loopback tests for the TCP bus endpoint
//!
//! Each test binds an ephemeral port on 127.0.0.1 and plays the peer with a
//! plain tokio TCP stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tcpcan_bus::{BusConfig, BusListener, CanMessage, ConnectionState, TcpBus};
use tcpcan_core::{decode, encode, FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> BusConfig {
    BusConfig {
        read_timeout_ms: 100,
        send_poll_ms: 10,
        ..BusConfig::new("127.0.0.1", 0)
    }
}

/// Bind, connect a peer and return both ends
async fn connected_pair() -> (TcpBus, TcpStream) {
    let listener = BusListener::bind(test_config()).await.unwrap();
    assert_eq!(listener.state(), ConnectionState::Listening);
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(listener.accept());
    let peer = TcpStream::connect(addr).await.unwrap();
    let bus = accept.await.unwrap().unwrap();
    (bus, peer)
}

fn messages(count: u32) -> Vec<CanMessage> {
    (0..count)
        .map(|i| {
            let mut msg = if i % 2 == 0 {
                CanMessage::new(0x100 + i, &[i as u8; 4]).unwrap()
            } else {
                CanMessage::new_extended(0x1ABC_0000 + i, &[i as u8]).unwrap()
            };
            msg.is_error_frame = i % 3 == 0;
            msg.with_timestamp(1_000.25 + i as f64)
        })
        .collect()
}

async fn read_frames(peer: &mut TcpStream, count: usize) -> Vec<CanMessage> {
    let mut buf = vec![0u8; count * FRAME_SIZE];
    tokio::time::timeout(WAIT, peer.read_exact(&mut buf))
        .await
        .expect("timed out waiting for frames")
        .unwrap();
    buf.chunks_exact(FRAME_SIZE)
        .map(|c| decode(c.try_into().unwrap()).unwrap())
        .collect()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_accepts_peer_and_reports_connected() {
    let (bus, peer) = connected_pair().await;
    assert!(bus.is_connected());
    assert_eq!(bus.state(), ConnectionState::Connected);
    assert_eq!(bus.peer_addr(), peer.local_addr().unwrap());
    bus.shutdown().await;
}

#[tokio::test]
async fn test_receive_reassembles_segmented_stream() {
    let (bus, mut peer) = connected_pair().await;
    let sent = messages(5);
    let bytes: Vec<u8> = sent.iter().flat_map(encode).collect();

    // Odd-sized segments that straddle frame boundaries
    for chunk in bytes.chunks(8) {
        peer.write_all(chunk).await.unwrap();
        peer.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut received = Vec::new();
    for _ in 0..sent.len() {
        received.push(bus.receive(Some(WAIT)).await.expect("missing frame"));
    }
    assert_eq!(received, sent);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_receive_timeout_returns_none() {
    let (bus, _peer) = connected_pair().await;
    let start = Instant::now();
    assert!(bus.receive(Some(Duration::from_millis(50))).await.is_none());
    assert!(start.elapsed() >= Duration::from_millis(50));
    bus.shutdown().await;
}

#[tokio::test]
async fn test_send_preserves_order() {
    let (bus, mut peer) = connected_pair().await;
    let sent = messages(6);
    for msg in &sent {
        bus.send(msg.clone()).unwrap();
    }

    assert_eq!(read_frames(&mut peer, sent.len()).await, sent);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_flags_packed_on_the_wire() {
    let (bus, mut peer) = connected_pair().await;
    let mut msg = CanMessage::new_extended(0x1ABCDEF0, &[0x11]).unwrap();
    msg.is_remote_frame = true;
    bus.send(msg).unwrap();

    let mut frame = [0u8; FRAME_SIZE];
    tokio::time::timeout(WAIT, peer.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();
    let raw = u32::from_le_bytes(frame[8..12].try_into().unwrap());
    assert_eq!(raw, 0x1ABCDEF0 | 0x8000_0000 | 0x4000_0000);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_clear_receive_buffer() {
    let (bus, mut peer) = connected_pair().await;
    let bytes: Vec<u8> = messages(3).iter().flat_map(encode).collect();
    peer.write_all(&bytes).await.unwrap();

    // Wait for the first frame, then give the rest time to land
    let first = bus.receive(Some(WAIT)).await;
    assert!(first.is_some());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(bus.clear_receive_buffer(), 2);
    assert!(bus.receive(Some(Duration::from_millis(20))).await.is_none());
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_while_receive_pending() {
    // Silent peer: the spawned receive has nothing to return
    let (bus, _peer) = connected_pair().await;
    let bus = Arc::new(bus);

    let waiter = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.receive(None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    let dropped = tokio::time::timeout(Duration::from_millis(100), async {
        bus.clear_receive_buffer()
    })
    .await
    .expect("clear_receive_buffer blocked behind a pending receive");
    assert_eq!(dropped, 0);

    // Closing the bus releases the waiter
    bus.shutdown().await;
    let last = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
    assert_eq!(last, None);
}

#[tokio::test]
async fn test_shutdown_closes_socket_promptly() {
    let (bus, mut peer) = connected_pair().await;

    let start = Instant::now();
    bus.shutdown().await;
    // One read timeout plus scheduling slack
    assert!(start.elapsed() < Duration::from_millis(600));
    assert!(!bus.is_connected());
    assert_eq!(bus.state(), ConnectionState::Disconnected);

    // Peer observes EOF
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(WAIT, peer.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert!(bus.send(messages(1).remove(0)).is_err());
}

#[tokio::test]
async fn test_shutdown_twice_is_noop() {
    let (bus, _peer) = connected_pair().await;
    bus.shutdown().await;
    bus.shutdown().await;
    assert!(!bus.is_connected());
}

#[tokio::test]
async fn test_peer_disconnect_detected_without_shutdown() {
    let (bus, peer) = connected_pair().await;
    drop(peer);

    wait_until(|| !bus.is_connected()).await;
    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert!(bus.receive(Some(Duration::from_millis(20))).await.is_none());

    // Still safe to call afterwards; reaps the loops
    bus.shutdown().await;
}

#[tokio::test]
async fn test_frames_before_disconnect_still_delivered() {
    let (bus, mut peer) = connected_pair().await;
    let sent = messages(2);
    let bytes: Vec<u8> = sent.iter().flat_map(encode).collect();
    peer.write_all(&bytes).await.unwrap();
    drop(peer);

    wait_until(|| !bus.is_connected()).await;
    assert_eq!(bus.receive(Some(WAIT)).await, Some(sent[0].clone()));
    assert_eq!(bus.receive(Some(WAIT)).await, Some(sent[1].clone()));
    assert_eq!(bus.receive(None).await, None);
}

#[tokio::test]
async fn test_second_peer_is_refused() {
    let listener = BusListener::bind(test_config()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(listener.accept());
    let _peer = TcpStream::connect(addr).await.unwrap();
    let bus = accept.await.unwrap().unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
    bus.shutdown().await;
}
