//! Greedy IoU matching in descending-overlap order.

use crate::config::TrackerSettings;
use crate::detect::Detection;
use crate::track::{ObjectTracker, TrackerCore, TrackerStats, TrackerUpdate};

pub struct IouTracker {
    core: TrackerCore,
    iou_threshold: f32,
}

impl IouTracker {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self {
            core: TrackerCore::new(settings),
            iou_threshold: settings.iou_threshold,
        }
    }
}

impl ObjectTracker for IouTracker {
    fn name(&self) -> &'static str {
        "iou"
    }

    fn update(&mut self, detections: &[Detection]) -> TrackerUpdate {
        let threshold = self.iou_threshold;
        self.core.step(detections, |detection, track| {
            let iou = detection.bbox.iou(&track.predicted_bbox());
            (iou >= threshold).then(|| 1.0 - iou)
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
    use crate::detect::ObjectClass;
    use crate::track::tests::person_at;
    use crate::BoundingBox;

    fn tracker() -> IouTracker {
        IouTracker::new(&TrackerSettings::default())
    }

    #[test]
    fn overlapping_detection_keeps_its_id() {
        let mut tracker = tracker();
        tracker.update(&[person_at(10.0, 10.0)]);

        let update = tracker.update(&[person_at(12.0, 10.0)]);
        assert_eq!(update.annotated[0].track_id, Some(1));
        assert_eq!(update.tracks.len(), 1);
    }

    #[test]
    fn class_mismatch_spawns_a_new_track() {
        let mut tracker = tracker();
        tracker.update(&[person_at(10.0, 10.0)]);

        let vehicle = Detection::new(
            ObjectClass::Vehicle,
            0.9,
            BoundingBox::new(10.0, 10.0, 10.0, 20.0),
            "cam:test".to_string(),
            0,
        );
        let update = tracker.update(&[vehicle]);
        assert_eq!(update.annotated[0].track_id, Some(2));
        assert_eq!(update.tracks.len(), 2);
    }

    #[test]
    fn detection_goes_to_the_best_overlapping_track() {
        let mut tracker = tracker();
        tracker.update(&[person_at(0.0, 0.0), person_at(6.0, 0.0)]);

        let update = tracker.update(&[person_at(1.0, 0.0)]);
        assert_eq!(update.annotated[0].track_id, Some(1));
        let missed = update.tracks.iter().find(|t| t.track_id == 2).unwrap();
        assert_eq!(missed.disappeared_frames, 1);
    }

    #[test]
    fn below_threshold_overlap_is_a_new_identity() {
        let mut tracker = tracker();
        tracker.update(&[person_at(10.0, 10.0)]);

        let update = tracker.update(&[person_at(19.0, 28.0)]);
        assert_eq!(update.annotated[0].track_id, Some(2));
        assert_eq!(update.tracks.len(), 2);
    }
}
