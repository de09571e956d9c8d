//! Nearest-centroid matching under a maximum pixel distance.

use crate::config::TrackerSettings;
use crate::detect::Detection;
use crate::track::{ObjectTracker, TrackerCore, TrackerStats, TrackerUpdate};

pub struct CentroidTracker {
    core: TrackerCore,
    max_distance: f32,
}

impl CentroidTracker {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self {
            core: TrackerCore::new(settings),
            max_distance: settings.max_distance,
        }
    }
}

impl ObjectTracker for CentroidTracker {
    fn name(&self) -> &'static str {
        "centroid"
    }

    fn update(&mut self, detections: &[Detection]) -> TrackerUpdate {
        let max_distance = self.max_distance;
        self.core.step(detections, |detection, track| {
            let (det_x, det_y) = detection.bbox.center();
            let (track_x, track_y) = track.predicted_bbox().center();
            let distance = ((det_x - track_x).powi(2) + (det_y - track_y).powi(2)).sqrt();
            (distance <= max_distance).then_some(distance)
        })
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn stats(&self) -> TrackerStats {
        self.core.stats(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::tests::person_at;

    fn tracker() -> CentroidTracker {
        CentroidTracker::new(&TrackerSettings::default())
    }

    #[test]
    fn id_is_stable_while_the_object_moves() {
        let mut tracker = tracker();
        for step in 0..3 {
            let update = tracker.update(&[person_at(10.0 + 4.0 * step as f32, 10.0)]);
            assert_eq!(update.annotated[0].track_id, Some(1));
        }
        let stats = tracker.stats();
        assert_eq!(stats.active_tracks, 1);
        assert_eq!(stats.total_tracks_created, 1);
        assert_eq!(stats.frames_processed, 3);
    }

    #[test]
    fn distant_detection_becomes_a_new_track() {
        let mut tracker = tracker();
        tracker.update(&[person_at(10.0, 10.0)]);

        let update = tracker.update(&[person_at(200.0, 200.0)]);
        assert_eq!(update.annotated[0].track_id, Some(2));
        assert_eq!(update.tracks.len(), 2);
        let coasting = update.tracks.iter().find(|t| t.track_id == 1).unwrap();
        assert_eq!(coasting.disappeared_frames, 1);
    }

    #[test]
    fn track_expires_after_the_disappearance_limit() {
        let mut settings = TrackerSettings::default();
        settings.max_disappear_frames = 2;
        let mut tracker = CentroidTracker::new(&settings);
        tracker.update(&[person_at(10.0, 10.0)]);

        let miss1 = tracker.update(&[]);
        assert_eq!(miss1.tracks.len(), 1);
        assert_eq!(miss1.tracks[0].disappeared_frames, 1);

        let miss2 = tracker.update(&[]);
        assert_eq!(miss2.tracks.len(), 1);

        let miss3 = tracker.update(&[]);
        assert_eq!(miss3.expired, vec![1]);
        assert!(miss3.tracks.is_empty());
    }

    #[test]
    fn missed_track_coasts_with_decayed_velocity() {
        let mut tracker = tracker();
        tracker.update(&[person_at(10.0, 10.0)]);
        tracker.update(&[person_at(18.0, 10.0)]);

        let update = tracker.update(&[]);
        let track = &update.tracks[0];
        assert!((track.bbox.x - 26.0).abs() < 1e-4);
        assert!((track.velocity.0 - 7.2).abs() < 1e-4);
        assert_eq!(track.velocity.1, 0.0);
    }

    #[test]
    fn position_history_is_bounded() {
        let mut settings = TrackerSettings::default();
        settings.history_len = 3;
        let mut tracker = CentroidTracker::new(&settings);

        for step in 0..5 {
            tracker.update(&[person_at(10.0 + step as f32, 10.0)]);
        }
        let update = tracker.update(&[person_at(15.0, 10.0)]);
        let history = &update.tracks[0].history;
        assert_eq!(history.len(), 3);
        assert_eq!(history.back().copied(), Some((20.0, 20.0)));
    }
}
