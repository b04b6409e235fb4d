//! Capture sources
//!
//! [`AudioSampleSource`] forwards captured PCM buffers and
//! [`PixelBufferSource`] copies raw frames into a reusable buffer before
//! forwarding them. Both drop input, with a debug log, while no output is
//! bound or the payload is not ready.
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
use crate::pipeline::{
    AudioFormat, Filter, FormatDescription, FrameMetadata, FrameState, Output, Source, SourceId,
    VideoFormat,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Output binding shared by the sources
#[derive(Default)]
struct SourceBinding {
    output: AtomicCell<Option<Weak<dyn Output>>>,
    filter: AtomicCell<Option<Arc<dyn Filter>>>,
}

impl SourceBinding {
    fn bind(&self, id: SourceId, output: &Arc<dyn Output>, buffer_size: usize) {
        if let Some(mixer) = output.as_mixer() {
            mixer.register_source(id, buffer_size);
        }
        self.output.set(Some(Arc::downgrade(output)));
    }

    fn output(&self) -> Option<Arc<dyn Output>> {
        self.output.with_value(|o| o.as_ref().and_then(Weak::upgrade))
    }
}

/// One captured audio buffer list
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub pts: Duration,
    pub format: AudioFormat,
    /// One entry per channel buffer; empty entries are skipped
    pub buffers: Vec<Vec<u8>>,
    pub data_ready: bool,
}

/// Source for captured audio
pub struct AudioSampleSource {
    id: SourceId,
    binding: SourceBinding,
}

impl AudioSampleSource {
    pub fn new() -> Self {
        AudioSampleSource {
            id: SourceId::new(),
            binding: SourceBinding::default(),
        }
    }

    /// Forward each non-empty buffer of `sample` to the bound output
    pub fn push_sample(&self, sample: &AudioSample) {
        let Some(output) = self.binding.output() else {
            debug!(source = %self.id, "No output bound, dropping audio sample");
            return;
        };
        if !sample.data_ready {
            debug!(source = %self.id, "Audio sample not ready, dropping");
            return;
        }

        let metadata = FrameMetadata {
            format: FormatDescription::Audio(sample.format),
            source: Some(self.id),
            ..FrameMetadata::with_timestamp(sample.pts)
        };
        for buffer in sample.buffers.iter().filter(|b| !b.is_empty()) {
            output.push_buffer(buffer, &metadata);
        }
    }
}

impl Default for AudioSampleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for AudioSampleSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn filter(&self) -> Option<Arc<dyn Filter>> {
        self.binding.filter.get()
    }

    fn set_filter(&self, filter: Option<Arc<dyn Filter>>) {
        self.binding.filter.set(filter);
    }

    fn set_output(&self, output: &Arc<dyn Output>) {
        self.binding.bind(self.id, output, 0);
    }
}

/// Source for raw video frames
pub struct PixelBufferSource {
    id: SourceId,
    format: VideoFormat,
    binding: SourceBinding,
    frame: AtomicCell<Vec<u8>>,
    state: AtomicCell<FrameState>,
}

impl PixelBufferSource {
    /// Four bytes per pixel (BGRA)
    pub fn new(width: u32, height: u32, pixel_format: u32) -> Self {
        let format = VideoFormat {
            width,
            height,
            pixel_format,
            bytes_per_pixel: 4,
        };
        PixelBufferSource {
            id: SourceId::new(),
            format,
            binding: SourceBinding::default(),
            frame: AtomicCell::new(vec![0; frame_size(&format)]),
            state: AtomicCell::new(FrameState::Available),
        }
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }

    pub fn frame_state(&self) -> FrameState {
        self.state.get()
    }

    /// Copy `pixels` into the frame buffer and forward it
    ///
    /// Input larger than one frame is truncated. Input shorter than one frame
    /// is dropped.
    pub fn push_pixel_buffer(&self, pixels: &[u8], pts: Duration) {
        let Some(output) = self.binding.output() else {
            debug!(source = %self.id, "No output bound, dropping frame");
            return;
        };
        let size = frame_size(&self.format);
        if pixels.len() < size {
            debug!(
                source = %self.id,
                len = pixels.len(),
                size,
                "Pixel buffer shorter than one frame, dropping"
            );
            return;
        }
        let acquired = self.state.modify(|state| {
            if *state != FrameState::Available {
                return false;
            }
            *state = FrameState::Acquired;
            true
        });
        if !acquired {
            debug!(source = %self.id, "Frame buffer busy, dropping frame");
            return;
        }
        let _release = FrameRelease(&self.state);

        let metadata = FrameMetadata {
            format: FormatDescription::Video(self.format),
            source: Some(self.id),
            is_key: true,
            ..FrameMetadata::with_timestamp(pts)
        };
        self.frame.modify(|frame| {
            let len = frame.len();
            frame.copy_from_slice(&pixels[..len]);
            self.state.set(FrameState::Enqueued);
            output.push_buffer(frame, &metadata);
        });
    }
}

/// Returns the frame buffer to `Available` when dropped, unwinding included
struct FrameRelease<'a>(&'a AtomicCell<FrameState>);

impl Drop for FrameRelease<'_> {
    fn drop(&mut self) {
        self.0.set(FrameState::Available);
    }
}

impl Source for PixelBufferSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn filter(&self) -> Option<Arc<dyn Filter>> {
        self.binding.filter.get()
    }

    fn set_filter(&self, filter: Option<Arc<dyn Filter>>) {
        self.binding.filter.set(filter);
    }

    fn set_output(&self, output: &Arc<dyn Output>) {
        self.binding.bind(self.id, output, frame_size(&self.format));
    }
}

fn frame_size(format: &VideoFormat) -> usize {
    format.width as usize * format.height as usize * format.bytes_per_pixel as usize
}
