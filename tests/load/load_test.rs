//! Load Tests for the Transport Core
//!
//! These tests simulate high load scenarios:
//! - Many producers feeding one serial job queue
//! - Concurrent stream sessions against a loopback echo server
//!
//! Run with: cargo test --test load_test --release

use broadcast_transport::{
    AtomicCell, ByteStreamSession, JobPriority, JobQueue, StreamSession, StreamSessionCallback,
    StreamStatus,
};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

#[test]
fn test_job_queue_many_producers() {
    let queue = Arc::new(JobQueue::new("load.jobs", JobPriority::High).expect("Failed to start queue"));
    let log = Arc::new(AtomicCell::new(Vec::<(usize, usize)>::new()));

    let producers = 8;
    let jobs_per_producer = 2_000;
    let start = Instant::now();

    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for seq in 0..jobs_per_producer {
                    let log = Arc::clone(&log);
                    queue.enqueue_fn(move || log.modify(|l| l.push((producer, seq))));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Producer panicked");
    }

    // Synchronous barrier: every job submitted above has run
    queue.enqueue_sync_fn(|| {});
    let elapsed = start.elapsed();

    let log = log.get();
    assert_eq!(log.len(), producers * jobs_per_producer);
    for producer in 0..producers {
        let sequence: Vec<usize> = log
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(sequence, (0..jobs_per_producer).collect::<Vec<_>>());
    }

    println!(
        "✅ Ran {} jobs in {:?} ({:.0} jobs/s)",
        log.len(),
        elapsed,
        log.len() as f64 / elapsed.as_secs_f64()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let port = listener.local_addr().expect("No local address").port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
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
        }
    });

    let sessions = 16;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..sessions {
        let payload: Vec<u8> = {
            let mut rng = rand::thread_rng();
            let len = rng.gen_range(256..2048);
            (0..len).map(|_| rng.gen()).collect()
        };
        handles.push(tokio::spawn(async move { echo_round_trip(port, payload).await }));
    }

    for handle in handles {
        let (sent, echoed) = handle.await.expect("Session task panicked");
        assert_eq!(sent, echoed);
    }

    println!("✅ {} sessions echoed in {:?}", sessions, start.elapsed());
}

async fn echo_round_trip(port: u16, payload: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    let (tx, rx) = flume::unbounded();
    let callback: StreamSessionCallback = Arc::new(move |_session: &dyn ByteStreamSession, bits| {
        let _ = tx.send(bits);
    });

    let session = StreamSession::new();
    session.connect("127.0.0.1", port, callback);

    let mut written = 0;
    let mut echoed = Vec::new();
    let mut buf = [0u8; 1024];
    while echoed.len() < payload.len() {
        let bits = timeout(Duration::from_secs(10), rx.recv_async())
            .await
            .expect("Timed out waiting for session event")
            .expect("Callback channel closed");
        assert!(!bits.intersects(StreamStatus::ERROR_ENCOUNTERED | StreamStatus::END_STREAM));

        if bits.contains(StreamStatus::WRITE_BUFFER_HAS_SPACE) && written < payload.len() {
            written += session.write(&payload[written..]);
        }
        if bits.contains(StreamStatus::READ_BUFFER_HAS_BYTES) {
            loop {
                let n = session.read(&mut buf);
                echoed.extend_from_slice(&buf[..n]);
                if n < buf.len() {
                    break;
                }
            }
        }
    }

    session.disconnect();
    (payload, echoed)
}
