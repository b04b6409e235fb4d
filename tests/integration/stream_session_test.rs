//! Integration Tests for the Stream Session
//!
//! Each test runs a loopback TCP server on an ephemeral port, so no external
//! endpoint is needed.

use broadcast_transport::{
    ByteStreamSession, ChannelState, Direction, StreamSession, StreamSessionCallback, StreamStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn recording_callback() -> (StreamSessionCallback, flume::Receiver<StreamStatus>) {
    let (tx, rx) = flume::unbounded();
    let callback: StreamSessionCallback = Arc::new(move |_session: &dyn ByteStreamSession, bits| {
        let _ = tx.send(bits);
    });
    (callback, rx)
}

async fn wait_for(rx: &flume::Receiver<StreamStatus>, flag: StreamStatus) {
    loop {
        let bits = timeout(WAIT, rx.recv_async())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {:?}", flag))
            .expect("Callback channel closed");
        if bits.contains(flag) {
            return;
        }
    }
}

/// Wait until every bit of `flags` is set, woken by callback events
async fn wait_for_status(rx: &flume::Receiver<StreamStatus>, session: &StreamSession, flags: StreamStatus) {
    while !session.status().contains(flags) {
        timeout(WAIT, rx.recv_async())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {:?}, status {:?}", flags, session.status()))
            .expect("Callback channel closed");
    }
}

/// Abort the connection with a reset when the socket is dropped
#[allow(deprecated)]
fn reset_on_drop(socket: &TcpStream) {
    let _ = socket.set_linger(Some(Duration::ZERO));
}

async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    port
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_and_echo() {
    let port = echo_server().await;
    let session = StreamSession::new();
    let (callback, rx) = recording_callback();

    session.connect("127.0.0.1", port, callback);
    wait_for(&rx, StreamStatus::CONNECTED).await;
    assert_eq!(session.channel_state(Direction::Input), ChannelState::Open);
    assert_eq!(session.channel_state(Direction::Output), ChannelState::Open);

    wait_for(&rx, StreamStatus::WRITE_BUFFER_HAS_SPACE).await;
    let message = b"hello broadcast";
    assert_eq!(session.write(message), message.len());

    let mut echoed = Vec::new();
    let mut buf = [0u8; 64];
    while echoed.len() < message.len() {
        wait_for(&rx, StreamStatus::READ_BUFFER_HAS_BYTES).await;
        let n = session.read(&mut buf);
        echoed.extend_from_slice(&buf[..n]);
    }
    assert_eq!(echoed, message);

    session.disconnect();
    assert_eq!(session.status(), StreamStatus::empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_refused_reports_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        listener.local_addr().expect("No local address").port()
    };

    let session = StreamSession::new();
    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", port, callback);

    wait_for(&rx, StreamStatus::ERROR_ENCOUNTERED).await;
    assert_eq!(session.status(), StreamStatus::ERROR_ENCOUNTERED);
    assert!(session.last_error(Direction::Output).is_some());
    assert_eq!(session.write(b"nothing"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_close_reports_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    let session = StreamSession::new();
    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", port, callback);

    wait_for(&rx, StreamStatus::END_STREAM).await;
    assert!(session.status().contains(StreamStatus::END_STREAM));
    assert!(!session.status().contains(StreamStatus::CONNECTED));
    assert_eq!(session.channel_state(Direction::Input), ChannelState::AtEnd);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_replaces_connection() {
    let first = echo_server().await;
    let second = echo_server().await;
    let session = StreamSession::new();

    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", first, callback);
    wait_for(&rx, StreamStatus::CONNECTED).await;

    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", second, callback);
    wait_for(&rx, StreamStatus::CONNECTED).await;
    wait_for(&rx, StreamStatus::WRITE_BUFFER_HAS_SPACE).await;
    assert_eq!(session.write(b"ping"), 4);

    session.disconnect();
    session.disconnect();
    assert_eq!(session.channel_state(Direction::Output), ChannelState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_filling_buffer_rearms_bytes_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    let (send_more, more) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if socket.write_all(b"chunk-01").await.is_err() || more.await.is_err() {
            return;
        }
        let _ = socket.write_all(b"chunk-02").await;
        // Hold the connection until the client goes away
        let mut buf = [0u8; 1];
        let _ = socket.read(&mut buf).await;
    });

    let session = StreamSession::new();
    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", port, callback);
    wait_for_status(&rx, &session, StreamStatus::CONNECTED | StreamStatus::READ_BUFFER_HAS_BYTES).await;

    // One read that exactly fills the buffer and drains the socket
    let mut buf = [0u8; 8];
    assert_eq!(session.read(&mut buf), 8);
    assert_eq!(&buf, b"chunk-01");
    assert!(!session.status().contains(StreamStatus::READ_BUFFER_HAS_BYTES));

    while rx.try_recv().is_ok() {}
    send_more.send(()).expect("Server task gone");

    wait_for(&rx, StreamStatus::READ_BUFFER_HAS_BYTES).await;
    assert_eq!(session.read(&mut buf), 8);
    assert_eq!(&buf, b"chunk-02");

    session.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_reported_after_pending_bytes_are_read() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"tail").await;
        }
    });

    let session = StreamSession::new();
    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", port, callback);
    wait_for_status(
        &rx,
        &session,
        StreamStatus::WRITE_BUFFER_HAS_SPACE | StreamStatus::READ_BUFFER_HAS_BYTES,
    )
    .await;
    assert!(!session.status().contains(StreamStatus::END_STREAM));

    let mut buf = [0u8; 4];
    assert_eq!(session.read(&mut buf), 4);
    assert_eq!(&buf, b"tail");

    // No further read or write needed
    wait_for(&rx, StreamStatus::END_STREAM).await;
    assert_eq!(session.status(), StreamStatus::END_STREAM);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_reported_while_bytes_are_unread() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    let (reset, reset_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if socket.write_all(b"data").await.is_err() || reset_rx.await.is_err() {
            return;
        }
        reset_on_drop(&socket);
        drop(socket);
    });

    let session = StreamSession::new();
    let (callback, rx) = recording_callback();
    session.connect("127.0.0.1", port, callback);
    wait_for_status(
        &rx,
        &session,
        StreamStatus::WRITE_BUFFER_HAS_SPACE | StreamStatus::READ_BUFFER_HAS_BYTES,
    )
    .await;

    reset.send(()).expect("Server task gone");
    wait_for(&rx, StreamStatus::ERROR_ENCOUNTERED).await;
    assert_eq!(session.status(), StreamStatus::ERROR_ENCOUNTERED);
    assert!(session.last_error(Direction::Input).is_some());
    assert_eq!(session.write(b"late"), 0);
}
