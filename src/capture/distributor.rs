//! Frame fan-out from capture to consumers.
//!
//! Two consumer classes with different contracts:
//!
//! - inference consumers get every frame at full resolution
//! - display consumers get 1 of every N frames, down-sampled
//!
//! Delivery is isolated per subscriber: one slow or broken consumer is
//! logged and counted, and its siblings still get the frame. The capture
//! loop behind `distribute` never blocks on a consumer.

use anyhow::{bail, Result};
use crossbeam_channel::{Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::frame::Frame;

/// A frame consumer. `deliver` must return quickly; queue or drop, never
/// process inline.
pub trait FrameSink: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, frame: Frame) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct DistributorStats {
    pub frames_distributed: u64,
    pub display_frames_published: u64,
    pub delivery_failures: u64,
}

pub struct FrameDistributor {
    inference: RwLock<Vec<Arc<dyn FrameSink>>>,
    display: RwLock<Vec<Arc<dyn FrameSink>>>,
    /// Per-camera frame counters driving the 1-of-N display decimation.
    display_counters: Mutex<HashMap<String, u64>>,
    display_rate_divisor: u64,
    display_downsample: u32,
    frames_distributed: AtomicU64,
    display_frames_published: AtomicU64,
    delivery_failures: AtomicU64,
}

impl FrameDistributor {
    pub fn new(display_rate_divisor: u64, display_downsample: u32) -> Self {
        Self {
            inference: RwLock::new(Vec::new()),
            display: RwLock::new(Vec::new()),
            display_counters: Mutex::new(HashMap::new()),
            display_rate_divisor: display_rate_divisor.max(1),
            display_downsample: display_downsample.max(1),
            frames_distributed: AtomicU64::new(0),
            display_frames_published: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    pub fn subscribe_inference(&self, sink: Arc<dyn FrameSink>) {
        if let Ok(mut sinks) = self.inference.write() {
            sinks.push(sink);
        }
    }

    pub fn subscribe_display(&self, sink: Arc<dyn FrameSink>) {
        if let Ok(mut sinks) = self.display.write() {
            sinks.push(sink);
        }
    }

    /// Fan one frame out to all subscribers. Never fails outward; per-sink
    /// errors are logged and counted.
    pub fn distribute(&self, frame: Frame) {
        self.frames_distributed.fetch_add(1, Ordering::Relaxed);

        let inference_sinks = match self.inference.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => Vec::new(),
        };
        for sink in &inference_sinks {
            self.deliver_to(sink, frame.clone());
        }

        if self.should_publish_display(&frame.camera_id) {
            let display_sinks = match self.display.read() {
                Ok(sinks) => sinks.clone(),
                Err(_) => Vec::new(),
            };
            if !display_sinks.is_empty() {
                let display_frame = frame.downsample(self.display_downsample);
                self.display_frames_published.fetch_add(1, Ordering::Relaxed);
                for sink in &display_sinks {
                    self.deliver_to(sink, display_frame.clone());
                }
            }
        }
    }

    fn deliver_to(&self, sink: &Arc<dyn FrameSink>, frame: Frame) {
        let camera_id = frame.camera_id.clone();
        if let Err(e) = sink.deliver(frame) {
            self.delivery_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "distributor: sink '{}' rejected frame from {}: {:#}",
                sink.name(),
                camera_id,
                e
            );
        }
    }

    fn should_publish_display(&self, camera_id: &str) -> bool {
        let mut counters = match self.display_counters.lock() {
            Ok(counters) => counters,
            Err(_) => return false,
        };
        let count = counters.entry(camera_id.to_string()).or_insert(0);
        *count += 1;
        (*count).is_multiple_of(self.display_rate_divisor)
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            frames_distributed: self.frames_distributed.load(Ordering::Relaxed),
            display_frames_published: self.display_frames_published.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Bridges a sink into a bounded channel.
///
/// A full channel drops the frame and counts it; that is the normal shedding
/// path for slow display consumers. A closed channel is a real failure.
pub struct ChannelSink {
    name: String,
    sender: Sender<Frame>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, sender: Sender<Frame>) -> Self {
        Self {
            name: name.into(),
            sender,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, frame: Frame) -> Result<()> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => bail!("channel closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn test_frame(n: u64) -> Frame {
        Frame::new("cam:test", 8, 8, 1, n, vec![n as u8; 64]).unwrap()
    }

    struct BrokenSink;
    impl FrameSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }
        fn deliver(&self, _frame: Frame) -> Result<()> {
            bail!("sink offline")
        }
    }

    #[test]
    fn every_inference_sink_gets_every_frame() {
        let distributor = FrameDistributor::new(3, 2);
        let (tx_a, rx_a) = bounded(16);
        let (tx_b, rx_b) = bounded(16);
        distributor.subscribe_inference(Arc::new(ChannelSink::new("a", tx_a)));
        distributor.subscribe_inference(Arc::new(ChannelSink::new("b", tx_b)));

        for n in 0..5 {
            distributor.distribute(test_frame(n));
        }

        assert_eq!(rx_a.try_iter().count(), 5);
        assert_eq!(rx_b.try_iter().count(), 5);
        assert_eq!(distributor.stats().frames_distributed, 5);
    }

    #[test]
    fn display_sinks_get_one_of_n_downsampled() {
        let distributor = FrameDistributor::new(3, 2);
        let (tx, rx) = bounded(16);
        distributor.subscribe_display(Arc::new(ChannelSink::new("display", tx)));

        for n in 0..6 {
            distributor.distribute(test_frame(n));
        }

        let frames: Vec<Frame> = rx.try_iter().collect();
        assert_eq!(frames.len(), 2);
        // full frames are 8x8; display frames are down-sampled by 2
        assert_eq!(frames[0].width, 4);
        assert_eq!(frames[0].height, 4);
        assert_eq!(distributor.stats().display_frames_published, 2);
    }

    #[test]
    fn broken_sink_does_not_starve_siblings() {
        let distributor = FrameDistributor::new(1, 1);
        let (tx, rx) = bounded(16);
        distributor.subscribe_inference(Arc::new(BrokenSink));
        distributor.subscribe_inference(Arc::new(ChannelSink::new("ok", tx)));

        for n in 0..3 {
            distributor.distribute(test_frame(n));
        }

        assert_eq!(rx.try_iter().count(), 3);
        assert_eq!(distributor.stats().delivery_failures, 3);
    }

    #[test]
    fn full_channel_sheds_instead_of_failing() {
        let (tx, rx) = bounded(1);
        let sink = ChannelSink::new("tiny", tx);
        assert!(sink.deliver(test_frame(0)).is_ok());
        assert!(sink.deliver(test_frame(1)).is_ok());
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_iter().count(), 1);

        drop(rx);
        assert!(sink.deliver(test_frame(2)).is_err());
    }

    #[test]
    fn display_decimation_is_per_camera() {
        let distributor = FrameDistributor::new(2, 1);
        let (tx, rx) = bounded(16);
        distributor.subscribe_display(Arc::new(ChannelSink::new("display", tx)));

        // interleave two cameras; each camera's 2nd frame is published
        for n in 0..2u64 {
            distributor.distribute(test_frame(n));
            let mut other = test_frame(n);
            other.camera_id = "cam:other".to_string();
            distributor.distribute(other);
        }

        assert_eq!(rx.try_iter().count(), 2);
    }
}
