//! Detection post-processing shared by engines: YOLO output decoding,
//! non-max suppression, and model-to-source coordinate scaling.

use crate::detect::result::{Detection, ObjectClass};
use crate::BoundingBox;

/// Confidence filter plus greedy class-aware non-max suppression.
///
/// Candidates are taken in descending confidence; a candidate is suppressed
/// when a kept detection of the same class overlaps it past `iou_threshold`.
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Vec<Detection> {
    detections.retain(|d| d.confidence >= confidence_threshold);
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep
            .iter()
            .any(|kept| kept.class == candidate.class && kept.bbox.iou(&candidate.bbox) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Linearly rescale a box from one coordinate space to another.
pub fn scale_bbox(bbox: &BoundingBox, from_w: u32, from_h: u32, to_w: u32, to_h: u32) -> BoundingBox {
    let sx = to_w as f32 / from_w.max(1) as f32;
    let sy = to_h as f32 / from_h.max(1) as f32;
    BoundingBox {
        x: bbox.x * sx,
        y: bbox.y * sy,
        width: bbox.width * sx,
        height: bbox.height * sy,
    }
}

/// Decode a YOLOv8-family detection head.
///
/// The head is a `[1, 4 + classes, anchors]` tensor (or its transpose):
/// center-x, center-y, width, height, then one score per class, no separate
/// objectness. `attrs_first` says which axis varies slowest in `data`.
/// Boxes come back in model-input pixel space; callers rescale.
#[allow(clippy::too_many_arguments)]
pub fn decode_yolo_output(
    data: &[f32],
    attrs: usize,
    anchors: usize,
    attrs_first: bool,
    confidence_threshold: f32,
    camera_id: &str,
    timestamp_ms: u64,
) -> Vec<Detection> {
    if attrs < 5 || data.len() != attrs * anchors {
        return Vec::new();
    }
    let at = |c: usize, a: usize| -> f32 {
        if attrs_first {
            data[c * anchors + a]
        } else {
            data[a * attrs + c]
        }
    };

    let classes = attrs - 4;
    let mut out = Vec::new();
    for a in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 0..classes {
            let score = at(4 + c, a);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < confidence_threshold {
            continue;
        }

        let cx = at(0, a);
        let cy = at(1, a);
        let w = at(2, a);
        let h = at(3, a);
        if w <= 0.0 || h <= 0.0 {
            continue;
        }

        out.push(Detection::new(
            ObjectClass::from_coco_id(best_class),
            best_score,
            BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
            camera_id,
            timestamp_ms,
        ));
    }
    out
}
