//! Zone evaluation and the per-zone occupancy state machine.
//!
//! `check_safety` is the per-frame entry point: for every person detection
//! it walks the five landmark candidates in priority order, projects each
//! into the zone's calibrated world space and tests it against the floor
//! polygon. The first landmark inside any zone is the violation for that
//! detection.
//!
//! Occupancy rules per zone:
//! - a newly-present identity always alerts immediately
//! - an identity whose landmark newly becomes a hand raises one
//!   cooldown-gated secondary alert
//! - every other repeat is suppressed
//! - identities absent from the current frame are purged
//!
//! The zone set is an immutable snapshot swapped atomically on refresh, so
//! concurrent checks never observe a half-updated configuration.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::config::ZoneEngineSettings;
use crate::detect::Detection;
use crate::evidence::EvidenceWriter;
use crate::frame::Frame;
use crate::storage::MonitorStore;
use crate::zone::events::{AlertRouter, EventSeverity, SafetyEvent, SafetyEventKind};
use crate::zone::geometry::point_in_polygon;
use crate::zone::landmarks::{landmark_candidates, Landmark};
use crate::zone::{Zone, ZoneCalibration};

/// Identities without a track id are keyed by a coarse spatial cell, so
/// repeat suppression still works when tracking is disabled.
const IDENTITY_CELL_PX: f32 = 64.0;

/// Outcome of one check cycle for one camera frame.
#[derive(Clone, Debug, Default)]
pub struct SafetyCheck {
    /// Events raised this cycle, already persisted and routed.
    pub violations: Vec<SafetyEvent>,
    /// Person detections currently inside a zone, including suppressed
    /// repeats.
    pub violating: Vec<Detection>,
    /// Person detections inside no zone.
    pub safe: Vec<Detection>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum IdentityKey {
    Track(u64),
    Cell(u32, u32),
}

fn identity_key(detection: &Detection) -> IdentityKey {
    match detection.track_id {
        Some(id) => IdentityKey::Track(id),
        None => {
            let (cx, cy) = detection.bbox.center();
            IdentityKey::Cell(
                (cx.max(0.0) / IDENTITY_CELL_PX) as u32,
                (cy.max(0.0) / IDENTITY_CELL_PX) as u32,
            )
        }
    }
}

#[derive(Clone, Copy)]
struct OccupantState {
    last_landmark: Landmark,
    last_hand_alert: Option<Instant>,
}

type ZoneOccupancy = HashMap<IdentityKey, OccupantState>;

/// Evaluable zones grouped by camera. Immutable once built.
struct ZoneIndex {
    by_camera: HashMap<String, Vec<Zone>>,
}

impl ZoneIndex {
    fn empty() -> Self {
        Self {
            by_camera: HashMap::new(),
        }
    }

    fn build(zones: Vec<Zone>) -> Self {
        let mut by_camera: HashMap<String, Vec<Zone>> = HashMap::new();
        for zone in zones {
            if !zone.enabled {
                log::debug!("zone '{}' disabled, not evaluating", zone.zone_id);
                continue;
            }
            if !zone.is_evaluable() {
                log::warn!(
                    "zone '{}' has unusable geometry or calibration, not evaluating",
                    zone.zone_id
                );
                continue;
            }
            by_camera
                .entry(zone.camera_id.clone())
                .or_default()
                .push(zone);
        }
        Self { by_camera }
    }

    fn for_camera(&self, camera_id: &str) -> &[Zone] {
        self.by_camera
            .get(camera_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn zone_count(&self) -> usize {
        self.by_camera.values().map(Vec::len).sum()
    }
}

/// Project a frame-pixel landmark into a zone's world space.
///
/// The point is first rescaled into the resolution the zone was calibrated
/// at, then divided down to meters.
fn landmark_world_point(
    point: (f32, f32),
    frame_width: u32,
    frame_height: u32,
    calibration: &ZoneCalibration,
) -> (f64, f64) {
    let ref_x = point.0 as f64 * calibration.frame_width as f64 / frame_width as f64;
    let ref_y = point.1 as f64 * calibration.frame_height as f64 / frame_height as f64;
    (
        ref_x / calibration.pixels_per_meter,
        ref_y / calibration.pixels_per_meter,
    )
}

fn find_violation<'a>(
    zones: &'a [Zone],
    detection: &Detection,
    frame: &Frame,
) -> Option<(&'a Zone, Landmark)> {
    for (landmark, point) in landmark_candidates(&detection.bbox) {
        for zone in zones {
            let world = landmark_world_point(point, frame.width, frame.height, &zone.calibration);
            if point_in_polygon(world, &zone.floor_points) {
                return Some((zone, landmark));
            }
        }
    }
    None
}

/// Advance one occupant through the state machine; returns the event to
/// raise, if any.
fn occupancy_transition(
    occupancy: &mut ZoneOccupancy,
    key: IdentityKey,
    landmark: Landmark,
    hand_cooldown: Duration,
) -> Option<SafetyEventKind> {
    let now = Instant::now();
    match occupancy.entry(key) {
        Entry::Vacant(entry) => {
            entry.insert(OccupantState {
                last_landmark: landmark,
                // An entry observed through a hand already covers the hand;
                // the cooldown starts here.
                last_hand_alert: landmark.is_hand().then_some(now),
            });
            Some(SafetyEventKind::ZoneEntry)
        }
        Entry::Occupied(mut entry) => {
            let state = entry.get_mut();
            let newly_hand = landmark.is_hand() && !state.last_landmark.is_hand();
            state.last_landmark = landmark;
            if !newly_hand {
                return None;
            }
            let cooled_down = state
                .last_hand_alert
                .map(|at| now.duration_since(at) >= hand_cooldown)
                .unwrap_or(true);
            if cooled_down {
                state.last_hand_alert = Some(now);
                Some(SafetyEventKind::HandZoneEntry)
            } else {
                None
            }
        }
    }
}

/// Evaluates detections against the configured zones and owns alert
/// persistence and fan-out.
pub struct SafetyMonitor {
    zones: RwLock<Arc<ZoneIndex>>,
    state: Mutex<HashMap<String, ZoneOccupancy>>,
    store: Arc<Mutex<dyn MonitorStore>>,
    router: AlertRouter,
    evidence: Option<EvidenceWriter>,
    hand_cooldown: Duration,
}

impl SafetyMonitor {
    pub fn new(
        store: Arc<Mutex<dyn MonitorStore>>,
        router: AlertRouter,
        settings: &ZoneEngineSettings,
        evidence: Option<EvidenceWriter>,
    ) -> Self {
        Self {
            zones: RwLock::new(Arc::new(ZoneIndex::empty())),
            state: Mutex::new(HashMap::new()),
            store,
            router,
            evidence,
            hand_cooldown: settings.hand_alert_cooldown,
        }
    }

    /// Reload zones from the store and swap in the new snapshot. Returns
    /// the number of evaluable zones.
    pub fn refresh_zones(&self) -> Result<usize> {
        let zones = self
            .store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?
            .load_zones()
            .context("load zones")?;
        let index = ZoneIndex::build(zones);
        let count = index.zone_count();
        *self
            .zones
            .write()
            .map_err(|_| anyhow!("zone index lock poisoned"))? = Arc::new(index);
        Ok(count)
    }

    pub fn zone_count(&self) -> usize {
        self.zones
            .read()
            .map(|index| index.zone_count())
            .unwrap_or(0)
    }

    pub fn router(&self) -> &AlertRouter {
        &self.router
    }

    /// Evaluate one frame's person detections against this camera's zones.
    pub fn check_safety(&self, frame: &Frame, detections: &[Detection]) -> Result<SafetyCheck> {
        let index = self
            .zones
            .read()
            .map_err(|_| anyhow!("zone index lock poisoned"))?
            .clone();
        let camera_zones = index.for_camera(&frame.camera_id);

        let mut check = SafetyCheck::default();
        if camera_zones.is_empty() {
            check.safe = detections
                .iter()
                .filter(|d| d.is_person())
                .cloned()
                .collect();
            return Ok(check);
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("occupancy state lock poisoned"))?;
        let mut seen: HashMap<&str, HashSet<IdentityKey>> = HashMap::new();

        for detection in detections {
            if !detection.is_person() {
                continue;
            }
            let Some((zone, landmark)) = find_violation(camera_zones, detection, frame) else {
                check.safe.push(detection.clone());
                continue;
            };
            let key = identity_key(detection);
            seen.entry(zone.zone_id.as_str()).or_default().insert(key);

            let occupancy = state.entry(zone.zone_id.clone()).or_default();
            if let Some(kind) =
                occupancy_transition(occupancy, key, landmark, self.hand_cooldown)
            {
                let event = self.build_event(kind, zone, detection, landmark, frame);
                self.persist_and_route(event, &mut check.violations);
            }
            check.violating.push(detection.clone());
        }

        // Occupants not seen this cycle have left the zone.
        for zone in camera_zones {
            let Some(occupancy) = state.get_mut(&zone.zone_id) else {
                continue;
            };
            match seen.get(zone.zone_id.as_str()) {
                Some(kept) => occupancy.retain(|key, _| kept.contains(key)),
                None => occupancy.clear(),
            }
            if occupancy.is_empty() {
                state.remove(&zone.zone_id);
            }
        }

        Ok(check)
    }

    fn build_event(
        &self,
        kind: SafetyEventKind,
        zone: &Zone,
        detection: &Detection,
        landmark: Landmark,
        frame: &Frame,
    ) -> SafetyEvent {
        let description = match kind {
            SafetyEventKind::ZoneEntry => format!(
                "person entered {} zone '{}' ({})",
                zone.kind.label(),
                zone.name,
                landmark.label()
            ),
            SafetyEventKind::HandZoneEntry => format!(
                "{} reached into {} zone '{}'",
                landmark.label(),
                zone.kind.label(),
                zone.name
            ),
        };
        let mut event = SafetyEvent {
            kind,
            severity: EventSeverity::for_zone(zone.kind),
            camera_id: frame.camera_id.clone(),
            zone_id: zone.zone_id.clone(),
            zone_kind: zone.kind,
            bbox: detection.bbox,
            confidence: detection.confidence,
            landmark,
            track_id: detection.track_id,
            timestamp_ms: frame.timestamp_ms,
            description,
            evidence_path: None,
            evidence_sha256: None,
        };
        if let Some(writer) = &self.evidence {
            // Snapshots carry the violating box burned in, so an operator can
            // see what tripped the alert without replaying footage.
            let annotated = frame.annotated(&[detection.bbox]);
            match writer.capture(&annotated, &zone.zone_id) {
                Ok(record) => {
                    event.evidence_path = record.path;
                    event.evidence_sha256 = Some(record.sha256);
                }
                Err(e) => log::warn!(
                    "evidence capture for zone '{}' failed: {:#}",
                    zone.zone_id,
                    e
                ),
            }
        }
        event
    }

    /// Persist first, then route. A store failure is logged and the alert
    /// still goes out; a lost row must not mean a lost alarm.
    fn persist_and_route(&self, event: SafetyEvent, violations: &mut Vec<SafetyEvent>) {
        match self.store.lock() {
            Ok(mut store) => {
                if let Err(e) = store.append_event(&event) {
                    log::error!(
                        "persist safety event for zone '{}' failed: {:#}",
                        event.zone_id,
                        e
                    );
                }
            }
            Err(_) => log::error!(
                "store lock poisoned, safety event for zone '{}' not persisted",
                event.zone_id
            ),
        }
        self.router.publish(event.clone());
        violations.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;
    use crate::storage::InMemoryMonitorStore;
    use crate::zone::ZoneKind;
    use crate::BoundingBox;

    // World space with ppm 10 against a 320x240 reference: pixel (px, py)
    // lands at (px / 10, py / 10) meters when the live frame is 320x240.
    fn zone(zone_id: &str, kind: ZoneKind, floor_points: Vec<(f64, f64)>) -> Zone {
        Zone {
            zone_id: zone_id.to_string(),
            camera_id: "cam:test".to_string(),
            name: "conveyor pit".to_string(),
            kind,
            floor_points,
            height_m: 2.0,
            calibration: ZoneCalibration {
                pixels_per_meter: 10.0,
                frame_width: 320,
                frame_height: 240,
            },
            enabled: true,
        }
    }

    fn lower_half_zone(kind: ZoneKind) -> Zone {
        zone(
            "zone:pit",
            kind,
            vec![(0.0, 5.0), (10.0, 5.0), (10.0, 10.0), (0.0, 10.0)],
        )
    }

    fn monitor_with(
        zones: Vec<Zone>,
        hand_cooldown: Duration,
    ) -> (SafetyMonitor, Arc<Mutex<dyn MonitorStore>>) {
        let mut backing = InMemoryMonitorStore::new();
        for zone in &zones {
            backing.save_zone(zone).unwrap();
        }
        let store: Arc<Mutex<dyn MonitorStore>> = Arc::new(Mutex::new(backing));
        let monitor = SafetyMonitor::new(
            store.clone(),
            AlertRouter::spawn(Vec::new()),
            &ZoneEngineSettings {
                hand_alert_cooldown: hand_cooldown,
            },
            None,
        );
        monitor.refresh_zones().unwrap();
        (monitor, store)
    }

    fn frame() -> Frame {
        Frame::new("cam:test", 320, 240, 1, 1_700_000_000_000, vec![0; 320 * 240]).unwrap()
    }

    fn person(bbox: BoundingBox, track_id: Option<u64>) -> Detection {
        let mut d = Detection::new(
            ObjectClass::Person,
            0.9,
            bbox,
            "cam:test".to_string(),
            1_700_000_000_000,
        );
        d.track_id = track_id;
        d
    }

    // Feet at pixel (50, 80) -> (5.0, 8.0) m, inside the lower-half zone.
    fn feet_in_zone() -> BoundingBox {
        BoundingBox::new(40.0, 20.0, 20.0, 60.0)
    }

    // Feet at (50, 110) -> (5.0, 11.0) m, outside; left hand at (40, 68)
    // -> (4.0, 6.8) m, inside.
    fn hand_in_zone() -> BoundingBox {
        BoundingBox::new(40.0, 50.0, 20.0, 60.0)
    }

    #[test]
    fn new_identity_alerts_once_then_repeats_are_suppressed() {
        let (monitor, store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        let detection = person(feet_in_zone(), Some(7));

        let first = monitor.check_safety(&frame(), &[detection.clone()]).unwrap();
        assert_eq!(first.violations.len(), 1);
        assert_eq!(first.violations[0].kind, SafetyEventKind::ZoneEntry);
        assert_eq!(first.violations[0].severity, EventSeverity::Critical);
        assert_eq!(first.violations[0].landmark, Landmark::Feet);
        assert!(first.violations[0].description.contains("danger"));
        assert_eq!(first.violating.len(), 1);
        assert!(first.safe.is_empty());

        for _ in 0..10 {
            let repeat = monitor.check_safety(&frame(), &[detection.clone()]).unwrap();
            assert!(repeat.violations.is_empty());
            assert_eq!(repeat.violating.len(), 1);
        }
        assert_eq!(store.lock().unwrap().event_count().unwrap(), 1);
    }

    #[test]
    fn absent_identity_is_purged_and_alerts_again_on_reentry() {
        let (monitor, store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        let detection = person(feet_in_zone(), Some(3));

        assert_eq!(
            monitor
                .check_safety(&frame(), &[detection.clone()])
                .unwrap()
                .violations
                .len(),
            1
        );
        let empty = monitor.check_safety(&frame(), &[]).unwrap();
        assert!(empty.violations.is_empty());

        let reentry = monitor.check_safety(&frame(), &[detection]).unwrap();
        assert_eq!(reentry.violations.len(), 1);
        assert_eq!(reentry.violations[0].kind, SafetyEventKind::ZoneEntry);
        assert_eq!(store.lock().unwrap().event_count().unwrap(), 2);
    }

    #[test]
    fn hand_transition_raises_a_cooled_down_secondary_alert() {
        let (monitor, _store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_millis(50),
        );
        let feet = person(feet_in_zone(), Some(1));
        let hand = person(hand_in_zone(), Some(1));

        let entry = monitor.check_safety(&frame(), &[feet.clone()]).unwrap();
        assert_eq!(entry.violations[0].kind, SafetyEventKind::ZoneEntry);

        let reach = monitor.check_safety(&frame(), &[hand.clone()]).unwrap();
        assert_eq!(reach.violations.len(), 1);
        assert_eq!(reach.violations[0].kind, SafetyEventKind::HandZoneEntry);
        assert_eq!(reach.violations[0].landmark, Landmark::LeftHand);

        // Same landmark: suppressed.
        assert!(monitor
            .check_safety(&frame(), &[hand.clone()])
            .unwrap()
            .violations
            .is_empty());
        // Back to feet: landmark change away from a hand never alerts.
        assert!(monitor
            .check_safety(&frame(), &[feet.clone()])
            .unwrap()
            .violations
            .is_empty());
        // Hand again inside the cooldown window: suppressed.
        assert!(monitor
            .check_safety(&frame(), &[hand.clone()])
            .unwrap()
            .violations
            .is_empty());

        std::thread::sleep(Duration::from_millis(80));
        assert!(monitor
            .check_safety(&frame(), &[feet])
            .unwrap()
            .violations
            .is_empty());
        let after_cooldown = monitor.check_safety(&frame(), &[hand]).unwrap();
        assert_eq!(after_cooldown.violations.len(), 1);
        assert_eq!(
            after_cooldown.violations[0].kind,
            SafetyEventKind::HandZoneEntry
        );
    }

    #[test]
    fn warning_zone_yields_warning_severity() {
        let (monitor, _store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Warning)],
            Duration::from_secs(5),
        );
        let check = monitor
            .check_safety(&frame(), &[person(feet_in_zone(), Some(1))])
            .unwrap();
        assert_eq!(check.violations[0].severity, EventSeverity::Warning);
        assert!(check.violations[0].description.contains("warning"));
    }

    #[test]
    fn person_outside_all_zones_is_safe() {
        let (monitor, _store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        // Whole body in the upper-left corner, every landmark above the zone.
        let check = monitor
            .check_safety(
                &frame(),
                &[person(BoundingBox::new(2.0, 2.0, 8.0, 16.0), Some(1))],
            )
            .unwrap();
        assert!(check.violations.is_empty());
        assert!(check.violating.is_empty());
        assert_eq!(check.safe.len(), 1);
    }

    #[test]
    fn non_person_detections_are_ignored() {
        let (monitor, _store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        let mut vehicle = person(feet_in_zone(), Some(1));
        vehicle.class = ObjectClass::Vehicle;

        let check = monitor.check_safety(&frame(), &[vehicle]).unwrap();
        assert!(check.violations.is_empty());
        assert!(check.violating.is_empty());
        assert!(check.safe.is_empty());
    }

    #[test]
    fn untracked_detections_suppress_repeats_by_cell() {
        let (monitor, _store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        let detection = person(feet_in_zone(), None);

        let first = monitor.check_safety(&frame(), &[detection.clone()]).unwrap();
        assert_eq!(first.violations.len(), 1);
        let second = monitor.check_safety(&frame(), &[detection]).unwrap();
        assert!(second.violations.is_empty());
        assert_eq!(second.violating.len(), 1);
    }

    #[test]
    fn calibration_rescales_frames_of_other_resolutions() {
        let (monitor, _store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        // Same scene at 640x480: every pixel coordinate doubles, the world
        // position does not.
        let hires = Frame::new("cam:test", 640, 480, 1, 1_700_000_000_000, vec![0; 640 * 480])
            .unwrap();
        let scaled = person(BoundingBox::new(80.0, 40.0, 40.0, 120.0), Some(9));

        let check = monitor.check_safety(&hires, &[scaled]).unwrap();
        assert_eq!(check.violations.len(), 1);
        assert_eq!(check.violations[0].landmark, Landmark::Feet);
    }

    #[test]
    fn unevaluable_zones_are_dropped_from_the_index() {
        let mut broken = lower_half_zone(ZoneKind::Danger);
        broken.floor_points.truncate(2);
        let mut disabled = lower_half_zone(ZoneKind::Danger);
        disabled.zone_id = "zone:off".to_string();
        disabled.enabled = false;

        let index = ZoneIndex::build(vec![
            broken,
            disabled,
            lower_half_zone(ZoneKind::Warning),
        ]);
        assert_eq!(index.zone_count(), 1);
        assert_eq!(index.for_camera("cam:test").len(), 1);
        assert!(index.for_camera("cam:other").is_empty());
    }

    #[test]
    fn evidence_digest_is_attached_when_configured() {
        let mut backing = InMemoryMonitorStore::new();
        backing.save_zone(&lower_half_zone(ZoneKind::Danger)).unwrap();
        let store: Arc<Mutex<dyn MonitorStore>> = Arc::new(Mutex::new(backing));
        let dir = tempfile::tempdir().unwrap();
        let monitor = SafetyMonitor::new(
            store,
            AlertRouter::spawn(Vec::new()),
            &ZoneEngineSettings {
                hand_alert_cooldown: Duration::from_secs(5),
            },
            Some(EvidenceWriter::new(dir.path()).unwrap()),
        );
        monitor.refresh_zones().unwrap();

        let check = monitor
            .check_safety(&frame(), &[person(feet_in_zone(), Some(2))])
            .unwrap();
        assert_eq!(check.violations.len(), 1);
        let digest = check.violations[0].evidence_sha256.as_deref().unwrap();
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn events_record_zone_and_camera_identity() {
        let (monitor, store) = monitor_with(
            vec![lower_half_zone(ZoneKind::Danger)],
            Duration::from_secs(5),
        );
        monitor
            .check_safety(&frame(), &[person(feet_in_zone(), Some(4))])
            .unwrap();

        let events = store
            .lock()
            .unwrap()
            .events_in_range(0, u64::MAX)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].camera_id, "cam:test");
        assert_eq!(events[0].zone_id, "zone:pit");
        assert_eq!(events[0].track_id, Some(4));
        assert_eq!(events[0].timestamp_ms, 1_700_000_000_000);
    }
}
