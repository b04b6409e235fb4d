//! Buffer-trend bandwidth estimation
//!
//! Decides, once per measurement tick, whether the encoder bitrate should go
//! up, hold or come down:
//! - a send buffer that keeps growing means the link cannot keep up, so the
//!   vector drops to -1 immediately
//! - a flat or draining buffer allows +1, but only once a settlement delay has
//!   passed since the last decrease and an increase delta since the last
//!   increase
//!
//! Throughput measured when the buffer trend turns around ("turn samples")
//! is averaged into the predicted sustainable bandwidth.
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


use broadcast_config::ThroughputSettings;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Throughput controller configuration
#[derive(Debug, Clone)]
pub struct ThroughputConfig {
    /// Decay of the throughput history weights (0.0 - 1.0)
    pub weight: f32,
    /// Throughput samples kept, most recent first
    pub bandwidth_sample_count: usize,
    /// Turn samples kept for the bandwidth prediction
    pub pivot_sample_count: usize,
    /// Buffer sizes compared to classify the trend
    pub growth_window: usize,
    /// Time between ticks
    pub measurement_delay: Duration,
    /// Minimum time after a decrease before the next increase
    pub settlement_delay: Duration,
    /// Minimum time between two increases
    pub increase_delta: Duration,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        ThroughputConfig {
            weight: 0.75,
            bandwidth_sample_count: 30,
            pivot_sample_count: 5,
            growth_window: 3,
            measurement_delay: Duration::from_secs(2),
            settlement_delay: Duration::from_secs(30),
            increase_delta: Duration::from_secs(10),
        }
    }
}

impl From<&ThroughputSettings> for ThroughputConfig {
    fn from(settings: &ThroughputSettings) -> Self {
        ThroughputConfig {
            measurement_delay: Duration::from_millis(settings.measurement_delay_ms),
            settlement_delay: Duration::from_millis(settings.settlement_delay_ms),
            increase_delta: Duration::from_millis(settings.increase_delta_ms),
            ..Default::default()
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// -1 (decrease), 0 (hold) or +1 (increase)
    pub vector: f32,
    /// Turn sample average taken before this tick's sample is added;
    /// 0 without turn samples or without a buffer sample
    pub predicted_bytes_per_sec: f32,
    /// Throughput measured over this tick
    pub immediate_bytes_per_sec: u64,
    /// Sum of the pairwise buffer size comparisons, `None` without a sample
    pub buffer_trend: Option<i32>,
}

/// Hysteresis state carried between ticks
#[derive(Debug, Clone)]
pub struct BandwidthTrend {
    config: ThroughputConfig,
    weights: Vec<f32>,
    bandwidth_samples: VecDeque<f32>,
    buffer_growth: VecDeque<usize>,
    turn_samples: VecDeque<f32>,
    previous_vector: f32,
    previous_turndown: Option<Instant>,
    previous_increase: Option<Instant>,
}

impl BandwidthTrend {
    pub fn new(config: ThroughputConfig) -> Self {
        let count = config.bandwidth_sample_count;
        let w = config.weight;
        let norm = (1.0 - w.powi(count as i32)) / (1.0 - w);
        let weights = (0..count).map(|i| w.powi(i as i32) / norm).collect();

        BandwidthTrend {
            weights,
            bandwidth_samples: VecDeque::with_capacity(count),
            buffer_growth: VecDeque::with_capacity(config.growth_window),
            turn_samples: VecDeque::with_capacity(config.pivot_sample_count),
            previous_vector: 0.0,
            previous_turndown: None,
            previous_increase: None,
            config,
        }
    }

    pub fn config(&self) -> &ThroughputConfig {
        &self.config
    }

    /// Run one tick.
    ///
    /// `sent_bytes` is everything sent during `elapsed`; `latest_buffer_size`
    /// is the last buffer occupancy sample of the tick, if any arrived.
    pub fn evaluate(
        &mut self,
        now: Instant,
        elapsed: Duration,
        sent_bytes: u64,
        latest_buffer_size: Option<usize>,
    ) -> TickReport {
        let seconds = elapsed.as_secs_f64();
        let detected = if seconds > 0.0 {
            (sent_bytes as f64 / seconds) as f32
        } else {
            0.0
        };
        push_bounded(&mut self.bandwidth_samples, detected, self.config.bandwidth_sample_count);

        let mut vector = 0.0;
        let mut buffer_trend = None;
        let mut predicted = 0.0;

        if let Some(buffer_size) = latest_buffer_size {
            push_bounded(&mut self.buffer_growth, buffer_size, self.config.growth_window);
            let trend = self.growth_trend();
            buffer_trend = Some(trend);

            if trend <= 0 && self.may_increase(now) {
                vector = 1.0;
            } else if trend > 0 {
                vector = -1.0;
                self.previous_turndown = Some(now);
            }

            if self.previous_vector < 0.0 && vector >= 0.0 {
                if let Some(&sample) = self.bandwidth_samples.front() {
                    push_bounded(&mut self.turn_samples, sample, self.config.pivot_sample_count);
                }
            }

            // Reported before this tick's own sample can join the average
            let turn_avg = self.turn_average();
            if detected > turn_avg {
                push_bounded(&mut self.turn_samples, detected, self.config.pivot_sample_count);
            }
            predicted = turn_avg;

            self.previous_vector = vector;
        }

        TickReport {
            vector,
            predicted_bytes_per_sec: predicted,
            immediate_bytes_per_sec: detected as u64,
            buffer_trend,
        }
    }

    /// Remember that an increase was applied at `at`
    pub fn record_increase(&mut self, at: Instant) {
        self.previous_increase = Some(at);
    }

    /// Average of the turn samples, 0 when there are none
    pub fn turn_average(&self) -> f32 {
        if self.turn_samples.is_empty() {
            return 0.0;
        }
        self.turn_samples.iter().sum::<f32>() / self.turn_samples.len() as f32
    }

    /// Exponentially weighted throughput over the history, newest heaviest
    pub fn weighted_throughput(&self) -> f32 {
        self.bandwidth_samples
            .iter()
            .zip(&self.weights)
            .map(|(sample, weight)| sample * weight)
            .sum()
    }

    pub fn previous_vector(&self) -> f32 {
        self.previous_vector
    }

    /// Whether a decrease has ever been emitted
    pub fn has_first_turndown(&self) -> bool {
        self.previous_turndown.is_some()
    }

    /// Forget all history
    pub fn reset(&mut self) {
        *self = BandwidthTrend::new(self.config.clone());
    }

    // newer < older counts -1, newer > older counts +1
    fn growth_trend(&self) -> i32 {
        self.buffer_growth
            .iter()
            .zip(self.buffer_growth.iter().skip(1))
            .map(|(newer, older)| match newer.cmp(older) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => 0,
            })
            .sum()
    }

    fn may_increase(&self, now: Instant) -> bool {
        match self.previous_turndown {
            None => true,
            Some(turndown) => {
                let settled = now.saturating_duration_since(turndown) > self.config.settlement_delay;
                let spaced = self
                    .previous_increase
                    .map_or(true, |increase| now.saturating_duration_since(increase) > self.config.increase_delta);
                settled && spaced
            }
        }
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, value: T, capacity: usize) {
    history.push_front(value);
    history.truncate(capacity);
}
