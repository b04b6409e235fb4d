//! Media pipeline contracts
//!
//! Sources push payloads downstream into outputs; transforms are outputs that
//! forward to another output; mixers are transforms fed by several sources.
//! Outputs are bound weakly, so a stage never keeps its consumer alive, and
//! metadata refers back to its source through a [`SourceId`] token.
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


use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Non-owning identifier of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        SourceId(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Uncompressed audio layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_channel: u32,
    pub channels: u32,
    pub bytes_per_frame: u32,
    /// Frames in this buffer
    pub frames: usize,
}

/// Raw video layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// FourCC pixel format
    pub pixel_format: u32,
    pub bytes_per_pixel: u32,
}

/// Payload description carried with each buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatDescription {
    #[default]
    Unspecified,
    Audio(AudioFormat),
    Video(VideoFormat),
}

/// Per-buffer metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameMetadata {
    /// Presentation timestamp, relative to the pipeline epoch
    pub pts: Duration,
    /// Decode timestamp, relative to the pipeline epoch
    pub dts: Duration,
    pub stream_index: usize,
    pub is_key: bool,
    pub format: FormatDescription,
    /// Payload is only valid during the push call
    pub temporary: bool,
    /// Source that produced the buffer
    pub source: Option<SourceId>,
}

impl FrameMetadata {
    /// Metadata with `pts == dts == ts`
    pub fn with_timestamp(ts: Duration) -> Self {
        FrameMetadata {
            pts: ts,
            dts: ts,
            ..Default::default()
        }
    }
}

/// Ownership state of a reusable frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Free for the producer
    #[default]
    Available,
    /// Taken out of a pool, not yet filled
    Dequeued,
    /// Filled and handed downstream
    Enqueued,
    /// Being written by the producer
    Acquired,
}

/// Consumer of buffers
pub trait Output: Send + Sync {
    /// Reference instant for timestamps
    fn set_epoch(&self, _epoch: Instant) {}

    fn push_buffer(&self, data: &[u8], metadata: &FrameMetadata);

    /// The mixer view of this output, if it accepts several sources
    fn as_mixer(&self) -> Option<&dyn Mixer> {
        None
    }
}

/// Processing stage attached to a source
pub trait Filter: Send + Sync {
    fn is_initialized(&self) -> bool;
    fn name(&self) -> &str;
    fn initialize(&self);
    fn bind(&self);
    fn unbind(&self);
}

/// Producer of buffers
pub trait Source: Send + Sync {
    fn id(&self) -> SourceId;
    fn filter(&self) -> Option<Arc<dyn Filter>>;
    fn set_filter(&self, filter: Option<Arc<dyn Filter>>);
    /// Bind the downstream consumer, registering with it if it is a mixer
    fn set_output(&self, output: &Arc<dyn Output>);
}

/// Output that forwards to another output
pub trait Transform: Output {
    fn set_output(&self, output: &Arc<dyn Output>);
}

/// Transform fed by several sources
pub trait Mixer: Transform {
    /// `buffer_size` is the expected payload size, 0 when it varies
    fn register_source(&self, source: SourceId, buffer_size: usize);
    fn unregister_source(&self, source: SourceId);
}
