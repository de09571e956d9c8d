//! Cheap motion gating with dwell hysteresis.
//!
//! A sparse luma grid is compared against the previous frame; the changed
//! fraction decides whether the scene is in motion. The processing level
//! only switches after it has been held for the configured dwell, so a
//! flickering scene cannot bounce the pipeline between skipping and
//! inferring.

use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Grid spacing for luma sampling.
const SAMPLE_STRIDE: u32 = 8;
/// Per-sample luma delta that counts as changed.
const PIXEL_DELTA: i16 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessLevel {
    /// Scene is still; skip inference.
    Skip,
    /// Scene is in motion; run full inference.
    Infer,
}

#[derive(Clone, Copy, Debug)]
pub struct MotionDecision {
    pub level: ProcessLevel,
    /// Raw motion verdict for this frame, before hysteresis.
    pub motion: bool,
}

struct MotionReference {
    width: u32,
    height: u32,
    samples: Vec<u8>,
}

pub struct MotionGate {
    threshold: f32,
    dwell: Duration,
    level: ProcessLevel,
    level_since: Instant,
    reference: Option<MotionReference>,
}

impl MotionGate {
    pub fn new(threshold: f32, dwell: Duration) -> Self {
        let now = Instant::now();
        Self {
            threshold,
            dwell,
            level: ProcessLevel::Skip,
            // Backdate the level so the first motion promotes immediately.
            level_since: now.checked_sub(dwell).unwrap_or(now),
            reference: None,
        }
    }

    pub fn evaluate(&mut self, frame: &Frame) -> MotionDecision {
        self.evaluate_at(frame, Instant::now())
    }

    pub fn evaluate_at(&mut self, frame: &Frame, now: Instant) -> MotionDecision {
        let ratio = self.changed_ratio(frame);
        let motion = ratio >= self.threshold;
        let desired = if motion {
            ProcessLevel::Infer
        } else {
            ProcessLevel::Skip
        };
        if desired != self.level && now.duration_since(self.level_since) >= self.dwell {
            log::debug!(
                "camera '{}': processing level {:?} -> {:?} (changed {:.3})",
                frame.camera_id,
                self.level,
                desired,
                ratio
            );
            self.level = desired;
            self.level_since = now;
        }
        MotionDecision {
            level: self.level,
            motion,
        }
    }

    /// Fraction of grid samples that changed versus the reference frame.
    /// No usable reference (first frame, resolution change) counts as full
    /// motion.
    fn changed_ratio(&mut self, frame: &Frame) -> f32 {
        let samples = sample_luma(frame);
        let ratio = match &self.reference {
            Some(reference)
                if reference.width == frame.width
                    && reference.height == frame.height
                    && reference.samples.len() == samples.len() =>
            {
                let changed = reference
                    .samples
                    .iter()
                    .zip(&samples)
                    .filter(|(a, b)| (**a as i16 - **b as i16).abs() > PIXEL_DELTA)
                    .count();
                changed as f32 / samples.len().max(1) as f32
            }
            _ => 1.0,
        };
        self.reference = Some(MotionReference {
            width: frame.width,
            height: frame.height,
            samples,
        });
        ratio
    }
}

fn sample_luma(frame: &Frame) -> Vec<u8> {
    let cols = frame.width.div_ceil(SAMPLE_STRIDE) as usize;
    let rows = frame.height.div_ceil(SAMPLE_STRIDE) as usize;
    let mut samples = Vec::with_capacity(cols * rows);
    let mut y = 0;
    while y < frame.height {
        let mut x = 0;
        while x < frame.width {
            samples.push(frame.luma_at(x, y));
            x += SAMPLE_STRIDE;
        }
        y += SAMPLE_STRIDE;
    }
    samples
}
