//! safevision - multi-camera industrial safety monitoring
//!
//! This crate implements the frame-to-alert processing chain for live safety
//! monitoring of industrial sites:
//!
//! 1. **Capture**: one acquisition loop per camera, producing raw frames.
//! 2. **Distribution**: fan-out to full-resolution inference consumers and
//!    rate-limited, down-sampled display consumers.
//! 3. **Inference**: pluggable detection engines with GPU to CPU selection
//!    and crash-triggered engine fallback.
//! 4. **Adaptive pipeline**: bounded-queue, motion-gated scheduling that
//!    drops frames under load instead of queuing latency.
//! 5. **Tracking**: stable per-camera identities across occlusion.
//! 6. **Safety zones**: calibrated world-space polygon tests per body
//!    landmark, with per-zone occupancy state and de-duplicated alerts.
//!
//! # Module Structure
//!
//! - `frame`: the `Frame` pixel buffer and its clone/annotate discipline
//! - `capture`: camera sources, the capture manager, the frame distributor
//! - `detect`: the `InferenceEngine` trait, concrete engines, the engine manager
//! - `pipeline`: the adaptive processing pipeline and its statistics
//! - `track`: the `ObjectTracker` trait and shipped strategies
//! - `zone`: safety zones, geometry, the occupancy state machine, alert fan-out
//! - `storage`: the `MonitorStore` persistence contract (SQLite + in-memory)
//! - `evidence`: alert evidence capture (JPEG + digest)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod capture;
pub mod config;
pub mod detect;
pub mod evidence;
pub mod frame;
pub mod pipeline;
pub mod storage;
pub mod track;
pub mod zone;

pub use capture::{
    CameraHandle, CameraManager, CameraSource, ChannelSink, FrameDistributor, FrameSink,
    SourceStats,
};
pub use config::{
    CameraSettings, CameraTransport, EngineSettings, MonitorConfig, PipelineSettings,
    TrackerSettings, ZoneEngineSettings,
};
pub use detect::{
    Detection, EngineFault, EngineManager, EngineStatus, InferenceEngine, ModelConfig, ObjectClass,
    StubEngine,
};
pub use evidence::{EvidenceRecord, EvidenceWriter};
pub use frame::Frame;
pub use pipeline::{
    AdaptivePipeline, EnqueueOutcome, OutputBus, OutputEvent, PipelineStats, StatsSnapshot,
};
pub use storage::{InMemoryMonitorStore, MonitorStore, SqliteMonitorStore};
pub use track::{ObjectTracker, Track, TrackerRegistry, TrackerSet, TrackerStats, TrackerUpdate};
pub use zone::{
    AlertRouter, ChannelAlertHandler, EventSeverity, Landmark, LogAlertHandler, SafetyCheck,
    SafetyEvent, SafetyEventHandler, SafetyEventKind, SafetyMonitor, Zone, ZoneCalibration,
    ZoneKind,
};

// -------------------- Time --------------------

/// Milliseconds since the Unix epoch.
///
/// All persisted timestamps in this crate are epoch milliseconds; wall-clock
/// formatting is left to consumers.
pub fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock is before the Unix epoch"))?;
    Ok(elapsed.as_millis() as u64)
}

// -------------------- Identifier Discipline --------------------

/// A conforming camera_id is a short local identifier, not a free-form label.
///
/// Allowed: "cam:entrance", "cam:line_a_3", "cam:dock-2"
/// Disallowed: anything with whitespace, slashes, or punctuation outside [_-].
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    // Compile once for hot paths.
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE.get_or_init(|| regex::Regex::new(r"^cam:[a-z0-9_-]{1,64}$").unwrap());

    let id = camera_id.to_lowercase();
    if !re.is_match(&id) {
        return Err(anyhow!(
            "camera_id must match ^cam:[a-z0-9_-]{{1,64}}$ (got {:?})",
            camera_id
        ));
    }
    Ok(())
}

/// Zone identifiers follow the same allowlist shape as camera identifiers.
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    static ZONE_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_ID_RE.get_or_init(|| regex::Regex::new(r"^zone:[a-z0-9_-]{1,64}$").unwrap());

    let id = zone_id.to_lowercase();
    if !re.is_match(&id) {
        return Err(anyhow!(
            "zone_id must match ^zone:[a-z0-9_-]{{1,64}}$ (got {:?})",
            zone_id
        ));
    }
    Ok(())
}

// -------------------- Bounding Boxes --------------------

/// Axis-aligned box in source-pixel coordinates (origin top-left).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        (self.width.max(0.0)) * (self.height.max(0.0))
    }

    /// Intersection-over-union with another box. Degenerate boxes score 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Translate by a velocity vector, clamping to non-negative coordinates.
    pub fn shifted(&self, dx: f32, dy: f32) -> BoundingBox {
        BoundingBox {
            x: (self.x + dx).max(0.0),
            y: (self.y + dy).max(0.0),
            width: self.width,
            height: self.height,
        }
    }
}
