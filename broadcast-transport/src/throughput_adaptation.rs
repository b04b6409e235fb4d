//! Adaptive bitrate throughput controller
//!
//! Samples arrive from any thread and are serialised onto two job queues
//! (sent bytes and buffer sizes on one, buffer durations on the other). A
//! dedicated sampler thread wakes every measurement delay, drains them
//! through the same queues, runs a [`BandwidthTrend`] tick and reports the
//! result to the registered [`ThroughputCallback`].
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


use crate::atomic_cell::AtomicCell;
use crate::bandwidth_estimation::{BandwidthTrend, ThroughputConfig};
use crate::error::{TransportError, TransportResult};
use crate::job_queue::{JobPriority, JobQueue};
use flume::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// `(vector, predicted_bytes_per_sec, immediate_bytes_per_sec) -> bitrate`
///
/// The returned bitrate is only logged by the controller.
pub type ThroughputCallback = Arc<dyn Fn(f32, f32, u64) -> u32 + Send + Sync>;

/// Control surface of a throughput controller
pub trait ThroughputAdaptation: Send + Sync {
    fn set_throughput_callback(&self, callback: ThroughputCallback);
    /// Bytes handed to the transport since the previous sample
    fn add_sent_bytes_sample(&self, bytes_sent: usize);
    /// Current send buffer occupancy in bytes
    fn add_buffer_size_sample(&self, buffer_size: usize);
    /// Current send buffer occupancy in milliseconds of media
    fn add_buffer_duration_sample(&self, buffer_duration: i64);
    /// Drop pending buffer size samples
    fn reset(&self);
    /// Start the sampler thread; no-op when running
    fn start(&self);
    /// Stop and join the sampler thread
    fn stop(&self);
}

#[derive(Debug, Default)]
struct TickSamples {
    sent: Vec<usize>,
    buffer_sizes: Vec<usize>,
}

struct AdaptationShared {
    config: ThroughputConfig,
    samples: Arc<AtomicCell<TickSamples>>,
    durations: Arc<AtomicCell<Vec<i64>>>,
    buff_queue: JobQueue,
    dur_queue: JobQueue,
    trend: AtomicCell<BandwidthTrend>,
    callback: AtomicCell<Option<ThroughputCallback>>,
    exiting: AtomicCell<bool>,
}

impl AdaptationShared {
    fn sample_loop(&self, shutdown: flume::Receiver<()>) {
        let mut prev = Instant::now();
        loop {
            match shutdown.recv_timeout(self.config.measurement_delay) {
                Err(RecvTimeoutError::Timeout) => {}
                // Explicit signal or the controller dropped its sender
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.exiting.get() {
                break;
            }

            let now = Instant::now();
            let elapsed = now.duration_since(prev);
            prev = now;
            self.tick(now, elapsed);
        }
        debug!("Throughput sampler stopped");
    }

    fn tick(&self, now: Instant, elapsed: Duration) {
        let samples = self.samples.clone();
        let drained = self
            .buff_queue
            .enqueue_sync_with(move || samples.modify(std::mem::take))
            .unwrap_or_default();

        let durations = self.durations.clone();
        let max_duration = self
            .dur_queue
            .enqueue_sync_with(move || durations.modify(|d| std::mem::take(d).into_iter().max()))
            .flatten();

        let sent: u64 = drained.sent.iter().map(|&s| s as u64).sum();
        let latest_buffer_size = drained.buffer_sizes.last().copied();

        let (report, weighted) = self.trend.modify(|trend| {
            let report = trend.evaluate(now, elapsed, sent, latest_buffer_size);
            (report, trend.weighted_throughput())
        });

        debug!(
            vector = report.vector,
            trend = ?report.buffer_trend,
            immediate_bps = report.immediate_bytes_per_sec,
            predicted_bps = report.predicted_bytes_per_sec,
            weighted_bps = weighted,
            buffer_size = ?latest_buffer_size,
            max_buffer_duration_ms = ?max_duration,
            "Throughput tick"
        );

        if let Some(callback) = self.callback.get() {
            let bitrate = callback(
                report.vector,
                report.predicted_bytes_per_sec,
                report.immediate_bytes_per_sec,
            );
            debug!(bitrate, "Throughput callback applied");
        }
        if report.vector > 0.0 {
            self.trend.modify(|trend| trend.record_increase(now));
        }
    }
}

struct Sampler {
    shutdown: flume::Sender<()>,
    handle: JoinHandle<()>,
}

/// Buffer-trend throughput controller for TCP transports
pub struct TcpThroughputAdaptation {
    shared: Arc<AdaptationShared>,
    sampler: AtomicCell<Option<Sampler>>,
}

impl TcpThroughputAdaptation {
    /// Create a stopped controller
    pub fn new(config: ThroughputConfig) -> TransportResult<Self> {
        let spawn_err = |e: std::io::Error| TransportError::ThreadSpawn(e.to_string());
        let buff_queue = JobQueue::new("broadcast.throughput.buff", JobPriority::Default).map_err(spawn_err)?;
        let dur_queue = JobQueue::new("broadcast.throughput.dur", JobPriority::Default).map_err(spawn_err)?;

        Ok(TcpThroughputAdaptation {
            shared: Arc::new(AdaptationShared {
                trend: AtomicCell::new(BandwidthTrend::new(config.clone())),
                config,
                samples: Arc::new(AtomicCell::default()),
                durations: Arc::new(AtomicCell::default()),
                buff_queue,
                dur_queue,
                callback: AtomicCell::new(None),
                exiting: AtomicCell::new(false),
            }),
            sampler: AtomicCell::new(None),
        })
    }

    pub fn config(&self) -> &ThroughputConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.sampler.with_value(Option::is_some)
    }
}

impl ThroughputAdaptation for TcpThroughputAdaptation {
    fn set_throughput_callback(&self, callback: ThroughputCallback) {
        self.shared.callback.set(Some(callback));
    }

    fn add_sent_bytes_sample(&self, bytes_sent: usize) {
        let samples = self.shared.samples.clone();
        self.shared
            .buff_queue
            .enqueue_fn(move || samples.modify(|s| s.sent.push(bytes_sent)));
    }

    fn add_buffer_size_sample(&self, buffer_size: usize) {
        let samples = self.shared.samples.clone();
        self.shared
            .buff_queue
            .enqueue_fn(move || samples.modify(|s| s.buffer_sizes.push(buffer_size)));
    }

    fn add_buffer_duration_sample(&self, buffer_duration: i64) {
        let durations = self.shared.durations.clone();
        self.shared
            .dur_queue
            .enqueue_fn(move || durations.modify(|d| d.push(buffer_duration)));
    }

    fn reset(&self) {
        let samples = self.shared.samples.clone();
        self.shared
            .buff_queue
            .enqueue_fn(move || samples.modify(|s| s.buffer_sizes.clear()));
    }

    fn start(&self) {
        self.sampler.modify(|sampler| {
            if sampler.is_some() {
                return;
            }
            self.shared.exiting.set(false);

            let (shutdown, shutdown_rx) = flume::bounded(1);
            let shared = self.shared.clone();
            match thread::Builder::new()
                .name("broadcast.throughput.adaptation".to_string())
                .spawn(move || shared.sample_loop(shutdown_rx))
            {
                Ok(handle) => {
                    info!(
                        measurement_delay_ms = self.shared.config.measurement_delay.as_millis() as u64,
                        "Throughput sampler started"
                    );
                    *sampler = Some(Sampler { shutdown, handle });
                }
                Err(e) => error!(error = %e, "Failed to start throughput sampler"),
            }
        });
    }

    fn stop(&self) {
        self.shared.exiting.set(true);
        let Some(sampler) = self.sampler.swap(None) else {
            return;
        };

        let _ = sampler.shutdown.try_send(());
        if sampler.handle.thread().id() == thread::current().id() {
            // Stopped from inside the callback; the loop exits on its own
            return;
        }
        if sampler.handle.join().is_err() {
            error!("Throughput sampler panicked");
        }
    }
}

impl Drop for TcpThroughputAdaptation {
    fn drop(&mut self) {
        self.stop();
    }
}
