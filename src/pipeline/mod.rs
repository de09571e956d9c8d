//! Adaptive per-frame processing.
//!
//! Frames arrive through [`AdaptivePipeline::enqueue`] into a small bounded
//! queue; a full queue sheds the newest frame and reports
//! [`EnqueueOutcome::Rejected`], which is flow control, not an error.
//! Workers pull tasks, run the motion gate, and only escalate to inference
//! when the scene is in motion. Each inferred frame then runs tracking and
//! the safety check synchronously, and results go out on the optional
//! [`OutputBus`] for display-layer observers.
//!
//! - `motion`: luma-grid motion gate with dwell hysteresis
//! - `stats`: shared atomic counters and periodic snapshots

mod motion;
mod stats;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;

use crate::capture::FrameSink;
use crate::config::PipelineSettings;
use crate::detect::{Detection, EngineManager};
use crate::frame::Frame;
use crate::track::{Track, TrackerSet};
use crate::zone::SafetyMonitor;

pub use motion::{MotionDecision, MotionGate, ProcessLevel};
pub use stats::{PipelineStats, StatsSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Queue full or pipeline stopping; the frame was released.
    Rejected,
}

/// Event published to presentation-layer observers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    Detections {
        camera_id: String,
        detections: Vec<Detection>,
        latency_ms: u64,
    },
    Tracks {
        camera_id: String,
        tracks: Vec<Track>,
        detections: Vec<Detection>,
    },
    Snapshot {
        stats: StatsSnapshot,
    },
}

/// Non-blocking observer channel. A slow observer loses events; it never
/// slows the pipeline.
#[derive(Clone)]
pub struct OutputBus {
    sender: Sender<OutputEvent>,
    dropped: Arc<std::sync::atomic::AtomicU64>,
}

impl OutputBus {
    pub fn new(capacity: usize) -> (Self, Receiver<OutputEvent>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            Self {
                sender,
                dropped: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            },
            receiver,
        )
    }

    pub fn publish(&self, event: OutputEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Task {
    frame: Frame,
    submitted_at: Instant,
}

/// The frame-processing stage between capture and the safety engine.
pub struct AdaptivePipeline {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PipelineStats>,
}

impl AdaptivePipeline {
    pub fn spawn(
        settings: &PipelineSettings,
        engine: Arc<Mutex<EngineManager>>,
        trackers: Arc<Mutex<TrackerSet>>,
        monitor: Arc<SafetyMonitor>,
        bus: Option<OutputBus>,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<Task>(settings.queue_capacity.max(1));
        let stats = Arc::new(PipelineStats::new());
        let gates: Arc<Mutex<HashMap<String, MotionGate>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = Vec::with_capacity(settings.workers);
        for worker_idx in 0..settings.workers.max(1) {
            let worker = Worker {
                receiver: receiver.clone(),
                engine: engine.clone(),
                trackers: trackers.clone(),
                monitor: monitor.clone(),
                bus: bus.clone(),
                stats: stats.clone(),
                gates: gates.clone(),
                motion_threshold: settings.motion_threshold,
                hysteresis: settings.hysteresis,
                snapshot_interval: settings.snapshot_interval,
                // One snapshot stream is enough regardless of worker count.
                emit_snapshots: worker_idx == 0,
            };
            let handle = std::thread::Builder::new()
                .name(format!("pipeline-{}", worker_idx))
                .spawn(move || worker.run())
                .context("spawn pipeline worker")?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            stats,
        })
    }

    /// Submit one frame. Never blocks; a full queue rejects the newest
    /// frame and releases its clone immediately.
    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return EnqueueOutcome::Rejected;
            }
        };
        let Some(sender) = guard.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::Rejected;
        };
        match sender.try_send(Task {
            frame,
            submitted_at: Instant::now(),
        }) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Accepted
            }
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => {
                // The newest frame is the one shed.
                drop(task);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Rejected
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let depth = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(Sender::len))
            .unwrap_or(0);
        self.stats.snapshot(depth)
    }

    /// Stop accepting frames, drain the queue, and join the workers.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| anyhow!("pipeline sender lock poisoned"))?
            .take();
        drop(sender);

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self
                .workers
                .lock()
                .map_err(|_| anyhow!("pipeline worker list lock poisoned"))?;
            workers.drain(..).collect()
        };

        let deadline = Instant::now() + timeout;
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    return Err(anyhow!(
                        "pipeline workers did not drain within {:?}",
                        timeout
                    ));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            handle
                .join()
                .map_err(|_| anyhow!("pipeline worker panicked"))?;
        }
        Ok(())
    }
}

impl FrameSink for AdaptivePipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn deliver(&self, frame: Frame) -> Result<()> {
        // Rejection is backpressure, not a sink failure.
        self.enqueue(frame);
        Ok(())
    }
}

struct Worker {
    receiver: Receiver<Task>,
    engine: Arc<Mutex<EngineManager>>,
    trackers: Arc<Mutex<TrackerSet>>,
    monitor: Arc<SafetyMonitor>,
    bus: Option<OutputBus>,
    stats: Arc<PipelineStats>,
    gates: Arc<Mutex<HashMap<String, MotionGate>>>,
    motion_threshold: f32,
    hysteresis: Duration,
    snapshot_interval: Duration,
    emit_snapshots: bool,
}

impl Worker {
    fn run(self) {
        let mut last_snapshot = Instant::now();
        loop {
            match self.receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(task) => self.process(task),
                Err(RecvTimeoutError::Timeout) => {}
                // Sender gone and queue drained: shutdown.
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.emit_snapshots && last_snapshot.elapsed() >= self.snapshot_interval {
                last_snapshot = Instant::now();
                self.emit_snapshot();
            }
        }
    }

    fn emit_snapshot(&self) {
        let snapshot = self.stats.snapshot(self.receiver.len());
        log::info!(
            "pipeline: processed {} (motion rate {:.2}, inference rate {:.2}), dropped {}, queue {}",
            snapshot.processed,
            snapshot.motion_hit_rate,
            snapshot.inference_rate,
            snapshot.dropped,
            snapshot.queue_depth
        );
        if let Some(bus) = &self.bus {
            bus.publish(OutputEvent::Snapshot { stats: snapshot });
        }
    }

    /// One frame, start to finish. Failures are logged and isolated; the
    /// worker always survives to take the next task.
    fn process(&self, task: Task) {
        let frame = task.frame;
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let decision = {
            let mut gates = match self.gates.lock() {
                Ok(gates) => gates,
                Err(_) => {
                    log::error!("motion gate lock poisoned, frame skipped");
                    return;
                }
            };
            gates
                .entry(frame.camera_id.clone())
                .or_insert_with(|| MotionGate::new(self.motion_threshold, self.hysteresis))
                .evaluate(&frame)
        };
        if decision.motion {
            self.stats.motion_hits.fetch_add(1, Ordering::Relaxed);
        }
        if decision.level != ProcessLevel::Infer {
            return;
        }

        self.stats.inference_runs.fetch_add(1, Ordering::Relaxed);
        let detections = match self.engine.lock() {
            Ok(mut engine) => engine.infer(&frame),
            Err(_) => {
                log::error!("engine lock poisoned, frame skipped");
                return;
            }
        };
        self.stats
            .detections
            .fetch_add(detections.len() as u64, Ordering::Relaxed);

        if let Some(bus) = &self.bus {
            let latency_ms = task.submitted_at.elapsed().as_millis() as u64;
            bus.publish(OutputEvent::Detections {
                camera_id: frame.camera_id.clone(),
                detections: detections.clone(),
                latency_ms,
            });
        }

        let update = match self.trackers.lock() {
            Ok(mut trackers) => trackers.update(&frame.camera_id, &detections),
            Err(_) => {
                log::error!("tracker lock poisoned, frame skipped");
                return;
            }
        };
        if let Some(bus) = &self.bus {
            bus.publish(OutputEvent::Tracks {
                camera_id: frame.camera_id.clone(),
                tracks: update.tracks.clone(),
                detections: update.annotated.clone(),
            });
        }

        match self.monitor.check_safety(&frame, &update.annotated) {
            Ok(check) => {
                if !check.violations.is_empty() {
                    log::info!(
                        "camera '{}': {} safety violation(s) raised",
                        frame.camera_id,
                        check.violations.len()
                    );
                }
            }
            Err(e) => log::warn!(
                "safety check failed for camera '{}': {:#}",
                frame.camera_id,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, TrackerSettings, ZoneEngineSettings};
    use crate::storage::{InMemoryMonitorStore, MonitorStore};
    use crate::zone::AlertRouter;

    fn engine() -> Arc<Mutex<EngineManager>> {
        let settings = EngineSettings {
            engine: "stub".to_string(),
            model_path: None,
            input_width: 640,
            input_height: 640,
            prefer_gpu: false,
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
        };
        let mut manager = EngineManager::from_settings(&settings).unwrap();
        manager.load().unwrap();
        Arc::new(Mutex::new(manager))
    }

    fn monitor() -> Arc<SafetyMonitor> {
        let store: Arc<Mutex<dyn MonitorStore>> =
            Arc::new(Mutex::new(InMemoryMonitorStore::new()));
        Arc::new(SafetyMonitor::new(
            store,
            AlertRouter::spawn(Vec::new()),
            &ZoneEngineSettings {
                hand_alert_cooldown: Duration::from_secs(5),
            },
            None,
        ))
    }

    fn settings(queue: usize, workers: usize) -> PipelineSettings {
        PipelineSettings {
            queue_capacity: queue,
            workers,
            motion_threshold: 0.02,
            hysteresis: Duration::from_secs(3),
            snapshot_interval: Duration::from_secs(10),
            display_rate_divisor: 3,
            display_downsample: 2,
        }
    }

    fn bright_figure_frame(offset: u32) -> Frame {
        let (w, h) = (64u32, 64u32);
        let mut pixels = vec![10u8; (w * h * 3) as usize];
        for y in 20..44u32 {
            for x in offset..offset + 12 {
                let idx = ((y * w + x) * 3) as usize;
                pixels[idx] = 230;
                pixels[idx + 1] = 225;
                pixels[idx + 2] = 220;
            }
        }
        Frame::new("cam:test", w, h, 3, 1_700_000_000_000, pixels).unwrap()
    }

    #[test]
    fn frames_flow_through_to_detection_events() {
        let (bus, events) = OutputBus::new(64);
        let pipeline = AdaptivePipeline::spawn(
            &settings(4, 1),
            engine(),
            Arc::new(Mutex::new(TrackerSet::new(TrackerSettings::default()).unwrap())),
            monitor(),
            Some(bus),
        )
        .unwrap();

        assert_eq!(
            pipeline.enqueue(bright_figure_frame(8)),
            EnqueueOutcome::Accepted
        );

        let mut saw_person = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(OutputEvent::Detections { detections, .. }) => {
                    saw_person = !detections.is_empty();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert!(saw_person, "expected a detection event from the stub engine");

        pipeline.shutdown(Duration::from_secs(5)).unwrap();
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.inference_runs, 1);
    }

    #[test]
    fn tracks_events_carry_identities() {
        let (bus, events) = OutputBus::new(64);
        let pipeline = AdaptivePipeline::spawn(
            &settings(4, 1),
            engine(),
            Arc::new(Mutex::new(TrackerSet::new(TrackerSettings::default()).unwrap())),
            monitor(),
            Some(bus),
        )
        .unwrap();

        pipeline.enqueue(bright_figure_frame(8));
        pipeline.enqueue(bright_figure_frame(12));
        pipeline.shutdown(Duration::from_secs(5)).unwrap();

        let mut track_ids = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OutputEvent::Tracks { detections, .. } = event {
                track_ids.extend(detections.iter().filter_map(|d| d.track_id));
            }
        }
        assert!(!track_ids.is_empty());
        assert!(track_ids.iter().all(|&id| id == track_ids[0]));
    }

    #[test]
    fn enqueue_after_shutdown_rejects() {
        let pipeline = AdaptivePipeline::spawn(
            &settings(2, 1),
            engine(),
            Arc::new(Mutex::new(TrackerSet::new(TrackerSettings::default()).unwrap())),
            monitor(),
            None,
        )
        .unwrap();
        pipeline.shutdown(Duration::from_secs(5)).unwrap();

        assert_eq!(
            pipeline.enqueue(bright_figure_frame(8)),
            EnqueueOutcome::Rejected
        );
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.submitted, 1);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn observer_bus_sheds_when_full() {
        let (bus, receiver) = OutputBus::new(1);
        bus.publish(OutputEvent::Snapshot {
            stats: PipelineStats::new().snapshot(0),
        });
        bus.publish(OutputEvent::Snapshot {
            stats: PipelineStats::new().snapshot(0),
        });
        assert_eq!(bus.dropped_events(), 1);
        assert_eq!(receiver.len(), 1);
    }
}
