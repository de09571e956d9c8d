//! Multi-object tracking.
//!
//! - [`Track`]: one persisted identity with velocity and a bounded
//!   position history.
//! - [`ObjectTracker`]: a per-camera tracking strategy.
//! - [`TrackerRegistry`]: name-keyed strategy factory.
//! - [`TrackerSet`]: per-camera tracker instances with runtime strategy
//!   swap and a pass-through mode when tracking is disabled.
//!
//! Strategies share [`TrackerCore`], which owns the track table and the
//! match/miss/expire cycle; a strategy only supplies the pairwise matching
//! cost. Matching is greedy in ascending-cost order, one detection per
//! track per cycle.

mod centroid;
mod iou;

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::TrackerSettings;
use crate::detect::{Detection, ObjectClass};
use crate::BoundingBox;

pub use centroid::CentroidTracker;
pub use iou::IouTracker;

/// Velocity multiplier applied on every unmatched cycle. Coasting tracks
/// slow down instead of sailing off at their last observed speed.
pub const VELOCITY_DECAY: f32 = 0.9;

/// One tracked identity.
#[derive(Clone, Debug, Serialize)]
pub struct Track {
    pub track_id: u64,
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Pixels per cycle, from the last matched movement.
    pub velocity: (f32, f32),
    pub age_frames: u64,
    pub disappeared_frames: u32,
    /// Recent centroids, oldest evicted first.
    pub history: VecDeque<(f32, f32)>,
}

impl Track {
    fn new(track_id: u64, detection: &Detection, history_len: usize) -> Self {
        let mut history = VecDeque::with_capacity(history_len.min(64));
        history.push_back(detection.bbox.center());
        Self {
            track_id,
            class: detection.class,
            bbox: detection.bbox,
            confidence: detection.confidence,
            velocity: (0.0, 0.0),
            age_frames: 1,
            disappeared_frames: 0,
            history,
        }
    }

    pub fn centroid(&self) -> (f32, f32) {
        self.bbox.center()
    }

    /// Where the object should be this cycle if it kept moving.
    pub fn predicted_bbox(&self) -> BoundingBox {
        self.bbox.shifted(self.velocity.0, self.velocity.1)
    }

    fn apply_match(&mut self, detection: &Detection, history_len: usize) {
        let (old_x, old_y) = self.bbox.center();
        let (new_x, new_y) = detection.bbox.center();
        self.velocity = (new_x - old_x, new_y - old_y);
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.age_frames += 1;
        self.disappeared_frames = 0;
        self.history.push_back((new_x, new_y));
        while self.history.len() > history_len {
            self.history.pop_front();
        }
    }

    fn apply_miss(&mut self) {
        self.bbox = self.predicted_bbox();
        self.velocity = (
            self.velocity.0 * VELOCITY_DECAY,
            self.velocity.1 * VELOCITY_DECAY,
        );
        self.age_frames += 1;
        self.disappeared_frames += 1;
    }
}

/// Result of one tracking cycle.
#[derive(Clone, Debug, Default)]
pub struct TrackerUpdate {
    /// Active tracks after this cycle, including coasting ones.
    pub tracks: Vec<Track>,
    /// The input detections with `track_id` filled in.
    pub annotated: Vec<Detection>,
    /// Ids of tracks that exceeded the disappearance limit this cycle.
    pub expired: Vec<u64>,
}

impl TrackerUpdate {
    /// Detections flow through untouched; no identity is assigned.
    fn passthrough(detections: &[Detection]) -> Self {
        Self {
            tracks: Vec::new(),
            annotated: detections.to_vec(),
            expired: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TrackerStats {
    pub algorithm: String,
    pub active_tracks: usize,
    pub total_tracks_created: u64,
    pub frames_processed: u64,
}

/// A tracking strategy bound to one camera.
pub trait ObjectTracker: Send {
    fn name(&self) -> &'static str;

    /// Run one match cycle against the current detections.
    fn update(&mut self, detections: &[Detection]) -> TrackerUpdate;

    /// Drop all identity state. Required before a strategy swap.
    fn reset(&mut self);

    fn stats(&self) -> TrackerStats;
}

/// Track table and match cycle shared by all strategies.
pub(crate) struct TrackerCore {
    tracks: Vec<Track>,
    next_id: u64,
    max_disappear_frames: u32,
    history_len: usize,
    total_created: u64,
    frames_processed: u64,
}

impl TrackerCore {
    pub(crate) fn new(settings: &TrackerSettings) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_disappear_frames: settings.max_disappear_frames,
            history_len: settings.history_len,
            total_created: 0,
            frames_processed: 0,
        }
    }

    /// One cycle: match, miss, expire, spawn.
    ///
    /// `cost` returns `Some(cost)` when a detection/track pair is an
    /// admissible match (lower cost matches first); class mismatches are
    /// rejected before the cost function runs.
    pub(crate) fn step<F>(&mut self, detections: &[Detection], cost: F) -> TrackerUpdate
    where
        F: Fn(&Detection, &Track) -> Option<f32>,
    {
        self.frames_processed += 1;

        let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
        for (detection_idx, detection) in detections.iter().enumerate() {
            for (track_idx, track) in self.tracks.iter().enumerate() {
                if detection.class != track.class {
                    continue;
                }
                if let Some(cost) = cost(detection, track) {
                    candidates.push((cost, detection_idx, track_idx));
                }
            }
        }

        let assignments = greedy_assign(candidates, detections.len(), self.tracks.len());

        let mut matched_detection = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];
        let mut annotated = detections.to_vec();

        for (detection_idx, track_idx) in assignments {
            matched_detection[detection_idx] = true;
            matched_track[track_idx] = true;
            let track = &mut self.tracks[track_idx];
            track.apply_match(&detections[detection_idx], self.history_len);
            annotated[detection_idx].track_id = Some(track.track_id);
        }

        for (track_idx, matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].apply_miss();
            }
        }

        let limit = self.max_disappear_frames;
        let mut expired = Vec::new();
        self.tracks.retain(|track| {
            if track.disappeared_frames > limit {
                expired.push(track.track_id);
                false
            } else {
                true
            }
        });

        for (detection_idx, matched) in matched_detection.iter().enumerate() {
            if !matched {
                let id = self.next_id;
                self.next_id += 1;
                self.total_created += 1;
                self.tracks
                    .push(Track::new(id, &detections[detection_idx], self.history_len));
                annotated[detection_idx].track_id = Some(id);
            }
        }

        TrackerUpdate {
            tracks: self.tracks.clone(),
            annotated,
            expired,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        self.total_created = 0;
        self.frames_processed = 0;
    }

    pub(crate) fn stats(&self, algorithm: &str) -> TrackerStats {
        TrackerStats {
            algorithm: algorithm.to_string(),
            active_tracks: self.tracks.len(),
            total_tracks_created: self.total_created,
            frames_processed: self.frames_processed,
        }
    }
}

/// Greedy assignment over (cost, detection, track) candidates in ascending
/// cost order. Each detection and each track is used at most once.
fn greedy_assign(
    mut candidates: Vec<(f32, usize, usize)>,
    detection_count: usize,
    track_count: usize,
) -> Vec<(usize, usize)> {
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut used_detection = vec![false; detection_count];
    let mut used_track = vec![false; track_count];
    let mut assignments = Vec::new();
    for (_, detection_idx, track_idx) in candidates {
        if used_detection[detection_idx] || used_track[track_idx] {
            continue;
        }
        used_detection[detection_idx] = true;
        used_track[track_idx] = true;
        assignments.push((detection_idx, track_idx));
    }
    assignments
}

type TrackerFactory = Box<dyn Fn(&TrackerSettings) -> Box<dyn ObjectTracker> + Send + Sync>;

/// Name-keyed tracking strategy factory.
pub struct TrackerRegistry {
    factories: HashMap<String, TrackerFactory>,
    default_name: Option<String>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry preloaded with the shipped strategies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("centroid", |settings| {
            Box::new(CentroidTracker::new(settings))
        });
        registry.register("iou", |settings| Box::new(IouTracker::new(settings)));
        registry
    }

    /// Register a strategy. The first registered strategy becomes the
    /// default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&TrackerSettings) -> Box<dyn ObjectTracker> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("tracking strategy '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Build a fresh instance of the named strategy.
    pub fn create(&self, name: &str, settings: &TrackerSettings) -> Result<Box<dyn ObjectTracker>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("tracking strategy '{}' not registered", name))?;
        Ok(factory(settings))
    }

    pub fn create_default(&self, settings: &TrackerSettings) -> Result<Box<dyn ObjectTracker>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no tracking strategy registered"))?;
        self.create(name, settings)
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-camera tracker instances behind one strategy selection.
///
/// Cameras get their own instance on first sight, so identities never
/// bleed between cameras. When tracking is disabled, detections pass
/// through with no identity assigned.
pub struct TrackerSet {
    registry: TrackerRegistry,
    settings: TrackerSettings,
    trackers: HashMap<String, Box<dyn ObjectTracker>>,
}

impl TrackerSet {
    pub fn new(settings: TrackerSettings) -> Result<Self> {
        let registry = TrackerRegistry::with_builtin();
        registry
            .create(&settings.algorithm, &settings)
            .with_context(|| format!("tracking strategy {:?}", settings.algorithm))?;
        Ok(Self {
            registry,
            settings,
            trackers: HashMap::new(),
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.settings.algorithm
    }

    /// Run one cycle for one camera.
    pub fn update(&mut self, camera_id: &str, detections: &[Detection]) -> TrackerUpdate {
        if !self.settings.enabled {
            return TrackerUpdate::passthrough(detections);
        }
        let tracker = match self.trackers.entry(camera_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                match self.registry.create(&self.settings.algorithm, &self.settings) {
                    Ok(tracker) => entry.insert(tracker),
                    Err(e) => {
                        log::error!("no tracker for camera '{}': {:#}", camera_id, e);
                        return TrackerUpdate::passthrough(detections);
                    }
                }
            }
        };
        tracker.update(detections)
    }

    /// Replace the tracking configuration at runtime.
    ///
    /// Every live instance is reset before being dropped so no identity
    /// state survives into the replacement strategy.
    pub fn apply_settings(&mut self, settings: TrackerSettings) -> Result<()> {
        self.registry
            .create(&settings.algorithm, &settings)
            .with_context(|| format!("tracking strategy {:?}", settings.algorithm))?;
        for tracker in self.trackers.values_mut() {
            tracker.reset();
        }
        self.trackers.clear();
        self.settings = settings;
        Ok(())
    }

    /// Switch strategy, keeping the rest of the settings.
    pub fn swap_strategy(&mut self, algorithm: &str) -> Result<()> {
        let mut settings = self.settings.clone();
        settings.algorithm = algorithm.to_string();
        self.apply_settings(settings)
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn stats(&self) -> HashMap<String, TrackerStats> {
        self.trackers
            .iter()
            .map(|(camera_id, tracker)| (camera_id.clone(), tracker.stats()))
            .collect()
    }
}
