//! Integration Tests for the Throughput Controller
//!
//! Wires `TcpThroughputAdaptation` to `AdaptiveBitrateController` the way a
//! broadcaster does and checks the bitrate reacts to the first tick.

use broadcast_transport::{
    AdaptiveBitrateConfig, AdaptiveBitrateController, Bitrates, TcpThroughputAdaptation,
    ThroughputAdaptation, ThroughputConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> ThroughputConfig {
    ThroughputConfig {
        measurement_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

#[test]
fn test_first_tick_raises_bitrate() {
    let throughput = TcpThroughputAdaptation::new(fast_config()).expect("Failed to create controller");
    let bitrate = Arc::new(AdaptiveBitrateController::new(AdaptiveBitrateConfig::default()));

    let (tx, rx) = flume::unbounded();
    let policy = bitrate.clone().into_callback();
    throughput.set_throughput_callback(Arc::new(move |vector, predicted, immediate| {
        let rate = policy(vector, predicted, immediate);
        let _ = tx.send((vector, rate));
        rate
    }));

    throughput.add_sent_bytes_sample(50_000);
    throughput.add_buffer_size_sample(0);
    throughput.add_buffer_duration_sample(0);
    throughput.start();

    let (vector, rate) = rx.recv_timeout(Duration::from_secs(5)).expect("No throughput tick");
    assert_eq!(vector, 1.0);
    assert_eq!(rate, (512_000 + 108_000) / 8);
    // The tick's own sample is not part of the estimate reported with it
    assert_eq!(bitrate.estimated_throughput(), 0);

    // Later ticks carry no buffer sample and hold
    let (vector, _) = rx.recv_timeout(Duration::from_secs(5)).expect("No second tick");
    assert_eq!(vector, 0.0);
    assert_eq!(bitrate.bitrates(), Bitrates { video: 512_000, audio: 108_000 });

    throughput.stop();
    assert!(!throughput.is_running());
}

#[test]
fn test_controller_can_be_stopped_from_callback() {
    let throughput = Arc::new(TcpThroughputAdaptation::new(fast_config()).expect("Failed to create controller"));
    let (tx, rx) = flume::unbounded();

    let weak = Arc::downgrade(&throughput);
    throughput.set_throughput_callback(Arc::new(move |_, _, _| {
        if let Some(controller) = weak.upgrade() {
            controller.stop();
        }
        let _ = tx.send(());
        0
    }));
    throughput.start();

    rx.recv_timeout(Duration::from_secs(5)).expect("No throughput tick");
    assert!(!throughput.is_running());
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}
