// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Drives a live stream session against the configured endpoint: AMF payloads
// sized to the current bitrate go out through the throughput controller, and a
// JSON summary is printed on exit.
use anyhow::Context;
use broadcast_config::AppConfig;
use broadcast_transport::{
    amf, AdaptiveBitrateConfig, AdaptiveBitrateController, AmfDataType, AtomicCell,
    ByteStreamSession, Direction, JobPriority, JobQueue, PreallocBuffer, StreamSession,
    StreamStatus, TcpThroughputAdaptation, ThroughputAdaptation, ThroughputConfig,
};
use bytes::BytesMut;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const PAYLOAD_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_DURATION_SECS: u64 = 30;
const INITIAL_BUFFER_SIZE: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Default, Clone)]
struct ProbeStats {
    payloads: u64,
    bytes_queued: u64,
    bytes_sent: u64,
    bytes_received: u64,
    connected_after: Option<Duration>,
}

struct Probe {
    started: Instant,
    session: StreamSession,
    pending: AtomicCell<PreallocBuffer>,
    send_queue: JobQueue,
    throughput: TcpThroughputAdaptation,
    bitrate: Arc<AdaptiveBitrateController>,
    stats: AtomicCell<ProbeStats>,
    finished: Notify,
}

impl Probe {
    fn new(config: &AppConfig) -> anyhow::Result<Arc<Self>> {
        let throughput = TcpThroughputAdaptation::new(ThroughputConfig::from(&config.throughput))
            .context("starting throughput controller")?;
        let bitrate = Arc::new(AdaptiveBitrateController::new(AdaptiveBitrateConfig::from(
            &config.bitrate,
        )));
        throughput.set_throughput_callback(bitrate.clone().into_callback());

        let send_queue =
            JobQueue::new("broadcast.probe.send", JobPriority::High).context("starting send queue")?;

        Ok(Arc::new(Probe {
            started: Instant::now(),
            session: StreamSession::new(),
            pending: AtomicCell::new(PreallocBuffer::new(INITIAL_BUFFER_SIZE)),
            send_queue,
            throughput,
            bitrate,
            stats: AtomicCell::default(),
            finished: Notify::new(),
        }))
    }

    fn connect(self: &Arc<Self>, host: &str, port: u16) {
        let probe = Arc::downgrade(self);
        self.session.connect(
            host,
            port,
            Arc::new(move |session: &dyn ByteStreamSession, bits: StreamStatus| {
                if let Some(probe) = probe.upgrade() {
                    probe.on_status(session, bits);
                }
            }),
        );
    }

    fn on_status(self: &Arc<Self>, session: &dyn ByteStreamSession, bits: StreamStatus) {
        if bits.contains(StreamStatus::CONNECTED) {
            let after = self.started.elapsed();
            info!(connect_ms = after.as_millis() as u64, "Probe connected");
            self.stats.modify(|s| s.connected_after = Some(after));
            self.throughput.start();
        }
        if bits.contains(StreamStatus::WRITE_BUFFER_HAS_SPACE) {
            self.schedule_drain();
        }
        if bits.contains(StreamStatus::READ_BUFFER_HAS_BYTES) {
            let mut chunk = [0u8; READ_CHUNK];
            let mut received = 0;
            loop {
                let n = session.read(&mut chunk);
                received += n;
                if n < chunk.len() {
                    break;
                }
            }
            debug!(received, "Peer data discarded");
            self.stats.modify(|s| s.bytes_received += received as u64);
        }
        if bits.intersects(StreamStatus::ERROR_ENCOUNTERED | StreamStatus::END_STREAM) {
            warn!(status = ?bits, "Stream session ended");
            self.finished.notify_one();
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        let probe = Arc::downgrade(self);
        self.send_queue.enqueue_fn(move || {
            if let Some(probe) = probe.upgrade() {
                probe.drain();
            }
        });
    }

    /// Write as much pending data as the session accepts
    fn drain(&self) {
        let (sent, remaining) = self.pending.modify(|pending| {
            if pending.available_bytes() == 0 {
                return (0, 0);
            }
            let sent = self.session.write(pending.read_buffer());
            pending.did_read(sent);
            (sent, pending.available_bytes())
        });

        if sent > 0 {
            self.stats.modify(|s| s.bytes_sent += sent as u64);
            self.throughput.add_sent_bytes_sample(sent);
        }
        self.throughput.add_buffer_size_sample(remaining);

        let byte_rate = u64::from(self.bitrate.bitrates().bytes_per_sec().max(1));
        self.throughput
            .add_buffer_duration_sample((remaining as u64 * 1000 / byte_rate) as i64);
    }

    /// Queue one metadata payload padded to the current bitrate
    fn produce(self: &Arc<Self>) {
        let bitrates = self.bitrate.bitrates();
        let target = (u64::from(bitrates.bytes_per_sec()) * PAYLOAD_INTERVAL.as_millis() as u64 / 1000) as usize;

        let mut payload = BytesMut::with_capacity(target.max(128));
        amf::put_string(&mut payload, "onMetaData");
        amf::put_byte(&mut payload, AmfDataType::EcmaArray.into());
        amf::put_be32(&mut payload, 3);
        amf::put_named_double(&mut payload, "videodatarate", f64::from(bitrates.video) / 1000.0);
        amf::put_named_double(&mut payload, "audiodatarate", f64::from(bitrates.audio) / 1000.0);
        amf::put_named_double(&mut payload, "timestamp", self.started.elapsed().as_millis() as f64);
        amf::put_be24(&mut payload, u8::from(AmfDataType::ObjectEnd).into());
        if payload.len() < target {
            payload.resize(target, 0);
        }

        self.pending.modify(|pending| pending.write(&payload));
        self.stats.modify(|s| {
            s.payloads += 1;
            s.bytes_queued += payload.len() as u64;
        });
        if self.session.status().contains(StreamStatus::WRITE_BUFFER_HAS_SPACE) {
            self.schedule_drain();
        }
    }

    fn shutdown(&self) {
        self.throughput.stop();
        self.session.disconnect();
        // Wait for queued drains to finish
        self.send_queue.enqueue_sync_fn(|| {});
    }

    fn summary(&self) -> serde_json::Value {
        let stats = self.stats.get();
        let bitrates = self.bitrate.bitrates();
        json!({
            "elapsed_ms": self.started.elapsed().as_millis() as u64,
            "connected_after_ms": stats.connected_after.map(|d| d.as_millis() as u64),
            "payloads": stats.payloads,
            "bytes_queued": stats.bytes_queued,
            "bytes_sent": stats.bytes_sent,
            "bytes_received": stats.bytes_received,
            "bytes_pending": self.pending.with_value(|p| p.available_bytes()),
            "video_bitrate_bps": bitrates.video,
            "audio_bitrate_bps": bitrates.audio,
            "estimated_throughput_bytes_per_sec": self.bitrate.estimated_throughput(),
            "output_error": self.session.last_error(Direction::Output),
            "input_error": self.session.last_error(Direction::Input),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    broadcast_logging::init_console_logging("stream-probe", config.log_level());

    let duration = std::env::var("PROBE_DURATION_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_DURATION_SECS));

    info!(
        endpoint = %config.endpoint_addr(),
        duration_secs = duration.as_secs(),
        "Starting stream probe"
    );

    let probe = Probe::new(&config)?;
    probe.connect(&config.endpoint.host, config.endpoint.port);

    let mut ticker = tokio::time::interval(PAYLOAD_INTERVAL);
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => probe.produce(),
            _ = &mut deadline => {
                info!("Probe duration elapsed");
                break;
            }
            _ = probe.finished.notified() => break,
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl+C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    probe.shutdown();
    println!("{}", serde_json::to_string_pretty(&probe.summary())?);
    Ok(())
}
