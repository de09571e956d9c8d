//! Body landmark estimation from person bounding boxes.
//!
//! Full pose estimation is out of scope; landmarks are fixed anatomical
//! proportions of the detection box. That is deliberately conservative: the
//! hand positions assume arms at rest, which is the latest (least alarming)
//! moment a reach into a zone can be detected.

use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// Body landmarks checked against zones, most safety-relevant first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Landmark {
    Feet,
    LeftHand,
    RightHand,
    Torso,
    Head,
}

impl Landmark {
    pub fn label(&self) -> &'static str {
        match self {
            Landmark::Feet => "feet",
            Landmark::LeftHand => "left_hand",
            Landmark::RightHand => "right_hand",
            Landmark::Torso => "torso",
            Landmark::Head => "head",
        }
    }

    /// Hand landmarks drive the reach-in escalation path.
    pub fn is_hand(&self) -> bool {
        matches!(self, Landmark::LeftHand | Landmark::RightHand)
    }
}

/// Landmark positions for a person box, in source-pixel coordinates.
///
/// Order is evaluation priority: standing in a zone (feet) outranks reaching
/// into it (hands), which outranks body overlap (torso, head). The first
/// landmark found inside a zone decides the event.
pub fn landmark_candidates(bbox: &BoundingBox) -> [(Landmark, (f32, f32)); 5] {
    let cx = bbox.x + bbox.width / 2.0;
    [
        (Landmark::Feet, (cx, bbox.y + bbox.height)),
        (Landmark::LeftHand, (bbox.x, bbox.y + bbox.height * 0.3)),
        (
            Landmark::RightHand,
            (bbox.x + bbox.width, bbox.y + bbox.height * 0.3),
        ),
        (Landmark::Torso, (cx, bbox.y + bbox.height * 0.5)),
        (Landmark::Head, (cx, bbox.y)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_positions_follow_box_proportions() {
        let b = BoundingBox::new(100.0, 200.0, 50.0, 100.0);
        let lm = landmark_candidates(&b);

        assert_eq!(lm[0].0, Landmark::Feet);
        assert_eq!(lm[0].1, (125.0, 300.0));

        assert_eq!(lm[1].0, Landmark::LeftHand);
        assert_eq!(lm[1].1, (100.0, 230.0));

        assert_eq!(lm[2].0, Landmark::RightHand);
        assert_eq!(lm[2].1, (150.0, 230.0));

        assert_eq!(lm[3].0, Landmark::Torso);
        assert_eq!(lm[3].1, (125.0, 250.0));

        assert_eq!(lm[4].0, Landmark::Head);
        assert_eq!(lm[4].1, (125.0, 200.0));
    }

    #[test]
    fn feet_come_before_hands() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let lm = landmark_candidates(&b);
        assert_eq!(lm[0].0, Landmark::Feet);
        assert!(lm[1].0.is_hand());
        assert!(lm[2].0.is_hand());
        assert!(!lm[3].0.is_hand());
    }
}
