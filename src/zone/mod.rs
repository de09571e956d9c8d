//! Safety zones: calibrated world-space regions and the occupancy logic
//! that turns detections inside them into alerts.
//!
//! - `Zone` / `ZoneCalibration`: persisted zone definitions (floor polygon in
//!   meters, per-zone pixel calibration)
//! - `geometry`: point-in-polygon test
//! - `landmarks`: body landmark extraction from person boxes
//! - `events`: the `SafetyEvent` record and the alert fan-out
//! - `monitor`: the `SafetyMonitor` evaluation and occupancy state machine

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod events;
pub mod geometry;
pub mod landmarks;
pub mod monitor;

pub use events::{
    AlertRouter, ChannelAlertHandler, EventSeverity, LogAlertHandler, SafetyEvent,
    SafetyEventHandler, SafetyEventKind,
};
pub use landmarks::Landmark;
pub use monitor::{SafetyCheck, SafetyMonitor};

/// How a zone escalates when occupied.
///
/// Warning zones generate advisory alerts; danger zones generate critical
/// ones. The evaluation logic is identical, only severity differs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Warning,
    Danger,
}

impl ZoneKind {
    pub fn label(&self) -> &'static str {
        match self {
            ZoneKind::Warning => "warning",
            ZoneKind::Danger => "danger",
        }
    }
}

/// Maps zone pixels to meters for one camera view.
///
/// `frame_width`/`frame_height` record the resolution the calibration was
/// performed at. Live frames at other resolutions are scaled into this
/// reference space before the meters conversion, so calibration survives
/// stream resolution changes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ZoneCalibration {
    pub pixels_per_meter: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl ZoneCalibration {
    pub fn is_sane(&self) -> bool {
        self.pixels_per_meter.is_finite()
            && self.pixels_per_meter > 0.0
            && self.frame_width > 0
            && self.frame_height > 0
    }
}

/// A persisted safety zone: a floor polygon in world meters, bound to one
/// camera view through its calibration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    pub camera_id: String,
    pub name: String,
    pub kind: ZoneKind,
    /// Floor polygon vertices in meters, in drawing order.
    pub floor_points: Vec<(f64, f64)>,
    /// Vertical extent in meters. Informational for now; occupancy is a
    /// floor-plane test.
    pub height_m: f64,
    pub calibration: ZoneCalibration,
    pub enabled: bool,
}

impl Zone {
    /// Structural validation. Called on save and again on load, so a row
    /// hand-edited into the database cannot poison evaluation.
    pub fn validate(&self) -> Result<()> {
        crate::validate_zone_id(&self.zone_id)?;
        crate::validate_camera_id(&self.camera_id)?;
        if self.name.is_empty() {
            return Err(anyhow!("zone {} has an empty name", self.zone_id));
        }
        if self.floor_points.len() < 3 {
            return Err(anyhow!(
                "zone {} has {} floor points, need at least 3",
                self.zone_id,
                self.floor_points.len()
            ));
        }
        for &(x, y) in &self.floor_points {
            if !x.is_finite() || !y.is_finite() {
                return Err(anyhow!("zone {} has non-finite floor points", self.zone_id));
            }
        }
        if !self.height_m.is_finite() || self.height_m < 0.0 {
            return Err(anyhow!("zone {} has invalid height", self.zone_id));
        }
        if !self.calibration.is_sane() {
            return Err(anyhow!("zone {} has invalid calibration", self.zone_id));
        }
        Ok(())
    }

    /// Whether this zone participates in safety evaluation.
    ///
    /// Disabled or structurally incomplete zones are carried (and listed)
    /// but never produce alerts.
    pub fn is_evaluable(&self) -> bool {
        self.enabled && self.floor_points.len() >= 3 && self.calibration.is_sane()
    }
}
