//! Real-time transport core for live broadcast
//!
//! This crate provides the platform-neutral pieces a mobile broadcaster sits on:
//! - Lock-guarded cells and serial job queues
//! - Bounded byte buffers, bit readers/writers and a table-driven CRC engine
//! - AMF-style typed value encoding
//! - A duplex byte-stream session over TCP with status/event callbacks
//! - The buffer-trend throughput controller and its bitrate policy
//! - Source/transform/output pipeline contracts
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


pub mod error;
pub mod atomic_cell;
pub mod job_queue;
pub mod buffer;
pub mod prealloc_buffer;
pub mod bitstream;
pub mod crc;
pub mod amf;
pub mod nal_type;
pub mod stream_session;
pub mod bandwidth_estimation;
pub mod throughput_adaptation;
pub mod adaptive_bitrate;
pub mod pipeline;
pub mod sources;
pub mod split;

// Re-export main types
pub use error::{TransportError, TransportResult};
pub use atomic_cell::AtomicCell;
pub use job_queue::{Job, JobPriority, JobQueue, SchedulingClass};
pub use buffer::Buffer;
pub use prealloc_buffer::PreallocBuffer;
pub use bitstream::{GetBits, PutBits, MAX_GET_BITS};
pub use crc::{CrcEngine, CrcTable, CrcVariant};
pub use amf::AmfDataType;
pub use nal_type::{nal_type_h264, nal_type_hevc, NalHeader, NalType};
pub use stream_session::{
    ByteStreamSession, ChannelState, Direction, StreamEvent, StreamSession,
    StreamSessionCallback, StreamStatus,
};
pub use bandwidth_estimation::{BandwidthTrend, ThroughputConfig, TickReport};
pub use throughput_adaptation::{
    TcpThroughputAdaptation, ThroughputAdaptation, ThroughputCallback,
};
pub use adaptive_bitrate::{
    AdaptiveBitrateConfig, AdaptiveBitrateController, Bitrates,
};
pub use pipeline::{
    AudioFormat, Filter, FormatDescription, FrameMetadata, FrameState, Mixer, Output,
    Source, SourceId, Transform, VideoFormat,
};
pub use sources::{AudioSample, AudioSampleSource, PixelBufferSource};
pub use split::Split;
