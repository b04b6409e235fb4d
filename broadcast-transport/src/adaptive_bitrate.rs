//! Adaptive bitrate policy
//!
//! Turns the throughput controller's recommendation into encoder bitrates.
//! Video moves along a step ladder (coarser steps at higher bitrates) and the
//! audio bitrate follows the video tier.
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
use crate::throughput_adaptation::ThroughputCallback;
use broadcast_config::BitrateSettings;
use std::sync::Arc;
use tracing::info;

/// Headroom between the predicted bandwidth and the bitrate clamped to it
pub const BITRATE_RATIO: f64 = 1.5;

/// Video bitrate the ladder starts from (bps)
pub const INITIAL_VIDEO_BITRATE: u32 = 500_000;

/// Adaptive bitrate configuration
#[derive(Debug, Clone)]
pub struct AdaptiveBitrateConfig {
    /// Maximum video bitrate (bps)
    pub ceiling_bps: u32,
    /// Minimum video bitrate (bps)
    pub min_video_bps: u32,
    /// Audio channel count, selects the stereo or mono audio tier
    pub audio_channels: u32,
    /// Clamp to the predicted bandwidth when it falls below the current rate
    pub clamp_to_bandwidth: bool,
}

impl Default for AdaptiveBitrateConfig {
    fn default() -> Self {
        AdaptiveBitrateConfig {
            ceiling_bps: 1_000_000,  // 1 Mbps
            min_video_bps: 32_000,   // 32 kbps
            audio_channels: 2,
            clamp_to_bandwidth: false,
        }
    }
}

impl From<&BitrateSettings> for AdaptiveBitrateConfig {
    fn from(settings: &BitrateSettings) -> Self {
        AdaptiveBitrateConfig {
            ceiling_bps: settings.ceiling_bps,
            min_video_bps: settings.min_video_bps,
            audio_channels: settings.audio_channels,
            clamp_to_bandwidth: settings.clamp_to_bandwidth,
        }
    }
}

/// Current encoder bitrates (bps)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitrates {
    pub video: u32,
    pub audio: u32,
}

impl Bitrates {
    /// Combined rate in bytes per second
    pub fn bytes_per_sec(&self) -> u32 {
        (self.video + self.audio) / 8
    }
}

/// Adaptive bitrate controller
#[derive(Debug)]
pub struct AdaptiveBitrateController {
    config: AdaptiveBitrateConfig,
    bitrates: AtomicCell<Bitrates>,
    estimated_throughput: AtomicCell<u32>,
}

impl AdaptiveBitrateController {
    pub fn new(config: AdaptiveBitrateConfig) -> Self {
        let video = INITIAL_VIDEO_BITRATE.min(config.ceiling_bps);
        let audio = audio_bitrate_for(video, config.audio_channels);
        AdaptiveBitrateController {
            config,
            bitrates: AtomicCell::new(Bitrates { video, audio }),
            estimated_throughput: AtomicCell::new(0),
        }
    }

    pub fn bitrates(&self) -> Bitrates {
        self.bitrates.get()
    }

    /// Last predicted bandwidth (bytes/s)
    pub fn estimated_throughput(&self) -> u32 {
        self.estimated_throughput.get()
    }

    /// Apply one throughput report; returns the new combined byte rate
    pub fn on_throughput(&self, vector: f32, predicted_bytes_per_sec: f32, immediate_bytes_per_sec: u64) -> u32 {
        self.estimated_throughput.set(predicted_bytes_per_sec as u32);

        let (previous, next) = self.bitrates.modify(|current| {
            let previous = *current;
            if vector != 0.0 {
                *current = self.step(*current, vector, predicted_bytes_per_sec);
            }
            (previous, *current)
        });

        if next != previous {
            info!(
                video_bps = next.video,
                audio_bps = next.audio,
                previous_video_bps = previous.video,
                predicted_bps = predicted_bytes_per_sec as u64 * 8,
                immediate_bps = immediate_bytes_per_sec * 8,
                "Bitrate adjusted"
            );
        }
        next.bytes_per_sec()
    }

    /// Wrap the controller as a throughput callback
    pub fn into_callback(self: Arc<Self>) -> ThroughputCallback {
        Arc::new(move |vector, predicted, immediate| self.on_throughput(vector, predicted, immediate))
    }

    fn step(&self, current: Bitrates, vector: f32, predicted: f32) -> Bitrates {
        let channels = self.config.audio_channels;
        let ceiling = i64::from(self.config.ceiling_bps);
        let min_video = i64::from(self.config.min_video_bps);

        if self.config.clamp_to_bandwidth && predicted > 0.0 && predicted < current.bytes_per_sec() as f32 {
            let bitrate = (f64::from(predicted) * 8.0 / BITRATE_RATIO) as i64;
            let audio = audio_bitrate_for(bitrate.clamp(0, i64::from(u32::MAX)) as u32, channels);
            let video = (bitrate - i64::from(audio)).max(min_video);
            return Bitrates {
                video: video as u32,
                audio,
            };
        }

        let vector: i64 = if vector < 0.0 { -1 } else { 1 };
        let video = i64::from(current.video);
        let audio = audio_bitrate_for(current.video, channels);

        let ladder = |step: i64| (video / step + vector) * step;
        let next = match video {
            v if v > 1_152_000 => ladder(384_000).min(ceiling),
            v if v > 512_000 => ladder(128_000).min(ceiling),
            v if v > 128_000 => ladder(64_000).min(ceiling),
            _ => ladder(32_000).min(ceiling).max(min_video),
        };

        Bitrates {
            video: next.max(0) as u32,
            audio,
        }
    }
}

/// Audio tier for a video bitrate
pub fn audio_bitrate_for(video_bps: u32, channels: u32) -> u32 {
    let stereo = channels > 1;
    match video_bps {
        v if v > 500_000 => if stereo { 128_000 } else { 108_000 },
        v if v > 250_000 => if stereo { 108_000 } else { 80_000 },
        _ => if stereo { 78_000 } else { 52_000 },
    }
}
