//! Pipeline counters and periodic snapshots.
//!
//! Counters are plain atomics bumped from the enqueue path and the
//! workers; a snapshot is a consistent-enough read for logs and
//! observers, not a transaction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

#[derive(Debug)]
pub struct PipelineStats {
    pub submitted: AtomicU64,
    pub accepted: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub motion_hits: AtomicU64,
    pub inference_runs: AtomicU64,
    pub detections: AtomicU64,
    started_at: Instant,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            motion_hits: AtomicU64::new(0),
            inference_runs: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self, queue_depth: usize) -> StatsSnapshot {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let accepted = self.accepted.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        let processed = self.processed.load(Ordering::Relaxed);
        let motion_hits = self.motion_hits.load(Ordering::Relaxed);
        let inference_runs = self.inference_runs.load(Ordering::Relaxed);
        let detections = self.detections.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        StatsSnapshot {
            submitted,
            accepted,
            dropped,
            processed,
            motion_hits,
            inference_runs,
            detections,
            queue_depth,
            motion_hit_rate: ratio(motion_hits, processed),
            inference_rate: ratio(inference_runs, processed),
            processed_per_sec: if elapsed > 0.01 {
                processed as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub processed: u64,
    pub motion_hits: u64,
    pub inference_runs: u64,
    pub detections: u64,
    pub queue_depth: usize,
    pub motion_hit_rate: f64,
    pub inference_rate: f64,
    pub processed_per_sec: f64,
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
