//! Model-free detector for demos and tests.
//!
//! Finds the brightest compact region that stands out from the scene mean
//! and reports it as a person. Tuned to the synthetic camera's figure, which
//! is exactly such a region; in a real deployment this engine is only a
//! wiring check.

use anyhow::Result;

use crate::detect::engine::{EngineFault, InferenceEngine, ModelConfig};
use crate::detect::post;
use crate::detect::result::{Detection, ObjectClass};
use crate::frame::Frame;
use crate::BoundingBox;

/// Luma margin above the scene mean that counts as "bright".
const BRIGHT_MARGIN: f32 = 60.0;
/// Sampling stride; full resolution buys nothing for a blob bound.
const SCAN_STRIDE: u32 = 2;
/// Minimum fraction of sampled pixels (1/N) that must be bright.
const MIN_COVERAGE_DIVISOR: u64 = 200;

pub struct StubEngine {
    loaded: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self { loaded: false }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&mut self, _config: &ModelConfig) -> Result<()> {
        self.loaded = true;
        log::debug!("stub engine loaded (no model file)");
        Ok(())
    }

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<Detection>> {
        if !self.loaded {
            return Err(EngineFault::transient("not_loaded", "stub engine not loaded").into());
        }

        let mean = frame.mean_luma() * 255.0;
        let threshold = (mean + BRIGHT_MARGIN).min(250.0);

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut hits: u64 = 0;
        let mut sampled: u64 = 0;

        let mut y = 0;
        while y < frame.height {
            let mut x = 0;
            while x < frame.width {
                sampled += 1;
                if frame.luma_at(x, y) as f32 > threshold {
                    hits += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
                x += SCAN_STRIDE;
            }
            y += SCAN_STRIDE;
        }

        if hits == 0 || hits < sampled / MIN_COVERAGE_DIVISOR {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x - min_x + SCAN_STRIDE) as f32,
            (max_y - min_y + SCAN_STRIDE) as f32,
        );
        let detection = Detection::new(
            ObjectClass::Person,
            0.9,
            bbox,
            frame.camera_id.clone(),
            frame.timestamp_ms,
        );

        Ok(post::non_max_suppression(
            vec![detection],
            confidence_threshold,
            nms_threshold,
        ))
    }
}
