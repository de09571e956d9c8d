use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// Object categories the monitoring chain reasons about.
///
/// COCO class ids map onto these; anything the safety logic has no rule for
/// collapses to `Unknown` rather than being dropped, so operators still see
/// it in overlays.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectClass {
    Person,
    Vehicle,
    Machinery,
    Unknown,
}

impl ObjectClass {
    /// Map a COCO-80 class id onto a monitoring category.
    pub fn from_coco_id(id: usize) -> Self {
        match id {
            0 => ObjectClass::Person,
            // car, bus, truck
            2 | 5 | 7 => ObjectClass::Vehicle,
            _ => ObjectClass::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Machinery => "machinery",
            ObjectClass::Unknown => "unknown",
        }
    }
}

/// One detected object in source-pixel coordinates.
///
/// `track_id` is `None` straight out of the engine; the tracker fills it in
/// for detections it could associate with an identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub track_id: Option<u64>,
    pub camera_id: String,
    pub timestamp_ms: u64,
}

impl Detection {
    pub fn new(
        class: ObjectClass,
        confidence: f32,
        bbox: BoundingBox,
        camera_id: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            class,
            confidence,
            bbox,
            track_id: None,
            camera_id: camera_id.into(),
            timestamp_ms,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class == ObjectClass::Person
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_ids_map_to_categories() {
        assert_eq!(ObjectClass::from_coco_id(0), ObjectClass::Person);
        assert_eq!(ObjectClass::from_coco_id(2), ObjectClass::Vehicle);
        assert_eq!(ObjectClass::from_coco_id(7), ObjectClass::Vehicle);
        assert_eq!(ObjectClass::from_coco_id(63), ObjectClass::Unknown);
    }

    #[test]
    fn detection_serializes_with_class_label() {
        let d = Detection::new(
            ObjectClass::Person,
            0.9,
            BoundingBox::new(1.0, 2.0, 3.0, 4.0),
            "cam:test",
            42,
        );
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"Person\""));
        assert!(json.contains("\"cam:test\""));
    }
}
