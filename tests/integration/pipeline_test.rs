//! Integration Tests for the Media Pipeline Contracts
//!
//! Capture sources feeding a split that fans out to a mixer-like aggregator
//! and a plain recorder.

use broadcast_transport::{
    AtomicCell, AudioFormat, AudioSample, AudioSampleSource, FormatDescription, FrameMetadata,
    Mixer, Output, PixelBufferSource, Source, SourceId, Split, Transform,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Recorder {
    frames: AtomicCell<Vec<FrameMetadata>>,
    bytes: AtomicCell<usize>,
}

impl Output for Recorder {
    fn push_buffer(&self, data: &[u8], metadata: &FrameMetadata) {
        self.frames.modify(|f| f.push(metadata.clone()));
        self.bytes.modify(|b| *b += data.len());
    }
}

/// Counts buffers per registered source
#[derive(Default)]
struct CountingMixer {
    counts: AtomicCell<Vec<(SourceId, usize)>>,
}

impl Output for CountingMixer {
    fn push_buffer(&self, _data: &[u8], metadata: &FrameMetadata) {
        let Some(source) = metadata.source else {
            return;
        };
        self.counts.modify(|counts| {
            if let Some(entry) = counts.iter_mut().find(|(id, _)| *id == source) {
                entry.1 += 1;
            }
        });
    }

    fn as_mixer(&self) -> Option<&dyn Mixer> {
        Some(self)
    }
}

impl Transform for CountingMixer {
    fn set_output(&self, _output: &Arc<dyn Output>) {}
}

impl Mixer for CountingMixer {
    fn register_source(&self, source: SourceId, _buffer_size: usize) {
        self.counts.modify(|counts| counts.push((source, 0)));
    }

    fn unregister_source(&self, source: SourceId) {
        self.counts.modify(|counts| counts.retain(|(id, _)| *id != source));
    }
}

fn mono_sample(pts_ms: u64) -> AudioSample {
    AudioSample {
        pts: Duration::from_millis(pts_ms),
        format: AudioFormat {
            sample_rate: 48_000,
            bits_per_channel: 16,
            channels: 1,
            bytes_per_frame: 2,
            frames: 480,
        },
        buffers: vec![vec![0; 960]],
        data_ready: true,
    }
}

#[test]
fn test_sources_into_mixer_keep_their_identity() {
    let mixer = Arc::new(CountingMixer::default());
    let mixer_output: Arc<dyn Output> = mixer.clone();

    let microphone = AudioSampleSource::new();
    let camera = PixelBufferSource::new(4, 4, u32::from_be_bytes(*b"BGRA"));
    microphone.set_output(&mixer_output);
    camera.set_output(&mixer_output);

    for i in 0..3 {
        microphone.push_sample(&mono_sample(i * 10));
    }
    camera.push_pixel_buffer(&[0xFF; 64], Duration::from_millis(33));

    let counts = mixer.counts.get();
    assert_eq!(counts.len(), 2);
    assert!(counts.contains(&(microphone.id(), 3)));
    assert!(counts.contains(&(camera.id(), 1)));

    mixer.unregister_source(microphone.id());
    assert_eq!(mixer.counts.get(), vec![(camera.id(), 1)]);
}

#[test]
fn test_split_feeds_recorder_and_mixer() {
    let split = Arc::new(Split::new());
    let recorder = Arc::new(Recorder::default());
    let mixer = Arc::new(CountingMixer::default());

    let recorder_output: Arc<dyn Output> = recorder.clone();
    let mixer_output: Arc<dyn Output> = mixer.clone();
    split.set_output(&recorder_output);
    split.set_output(&mixer_output);

    let microphone = AudioSampleSource::new();
    mixer.register_source(microphone.id(), 0);
    let split_output: Arc<dyn Output> = split.clone();
    microphone.set_output(&split_output);

    microphone.push_sample(&mono_sample(0));
    microphone.push_sample(&mono_sample(10));

    let frames = recorder.frames.get();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].pts, Duration::from_millis(10));
    assert!(matches!(frames[0].format, FormatDescription::Audio(f) if f.channels == 1));
    assert_eq!(recorder.bytes.get(), 1920);
    assert_eq!(mixer.counts.get(), vec![(microphone.id(), 2)]);

    // Dropping the split stops delivery without touching the outputs
    drop(split_output);
    drop(split);
    microphone.push_sample(&mono_sample(20));
    assert_eq!(recorder.frames.get().len(), 2);
}
