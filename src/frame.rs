//! Frame: the pixel buffer flowing through the monitoring chain.
//!
//! Frames are plain interleaved byte buffers (RGB24 or single-channel gray)
//! plus the metadata every downstream stage needs: source camera, dimensions,
//! and capture timestamp. Frames are cheap to clone relative to inference
//! cost, and every consumer that mutates pixels (annotation, down-sampling)
//! works on its own clone. The buffer itself is never exposed mutably.

use anyhow::{anyhow, Result};

/// One captured image plus capture metadata.
///
/// `channels` is 3 for RGB24 and 1 for grayscale. The data length is always
/// exactly `width * height * channels`; `new` rejects anything else.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub camera_id: String,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub timestamp_ms: u64,
}

impl Frame {
    pub fn new(
        camera_id: impl Into<String>,
        width: u32,
        height: u32,
        channels: u8,
        timestamp_ms: u64,
        data: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if channels != 1 && channels != 3 {
            return Err(anyhow!("unsupported channel count: {}", channels));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(channels as usize))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame data length {} does not match {}x{}x{} = {}",
                data.len(),
                width,
                height,
                channels,
                expected
            ));
        }
        Ok(Self {
            data,
            camera_id: camera_id.into(),
            width,
            height,
            channels,
            timestamp_ms,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Luma of the pixel at (x, y), in 0..=255. Out-of-range coordinates
    /// clamp to the frame edge.
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let idx = (y * self.width as usize + x) * self.channels as usize;
        if self.channels == 1 {
            self.data[idx]
        } else {
            // BT.601 integer approximation, good enough for gating.
            let r = self.data[idx] as u32;
            let g = self.data[idx + 1] as u32;
            let b = self.data[idx + 2] as u32;
            ((299 * r + 587 * g + 114 * b) / 1000) as u8
        }
    }

    /// Mean luma over the whole frame, normalized to 0.0..=1.0.
    ///
    /// Used by capture warm-up to reject zero-signal streams (a camera that
    /// "connects" but delivers black frames).
    pub fn mean_luma(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mut sum: u64 = 0;
        match self.channels {
            1 => {
                for &v in &self.data {
                    sum += v as u64;
                }
                sum as f32 / (self.data.len() as f32 * 255.0)
            }
            _ => {
                for chunk in self.data.chunks_exact(3) {
                    let r = chunk[0] as u64;
                    let g = chunk[1] as u64;
                    let b = chunk[2] as u64;
                    sum += (299 * r + 587 * g + 114 * b) / 1000;
                }
                let pixels = (self.width as u64 * self.height as u64) as f32;
                sum as f32 / (pixels * 255.0)
            }
        }
    }

    /// Spatially down-sampled copy, taking every `stride`-th pixel on both
    /// axes. Used for display-path frames where full resolution is wasted.
    pub fn downsample(&self, stride: u32) -> Frame {
        let stride = stride.max(1);
        if stride == 1 {
            return self.clone();
        }
        let out_w = self.width.div_ceil(stride);
        let out_h = self.height.div_ceil(stride);
        let ch = self.channels as usize;
        let mut out = Vec::with_capacity(out_w as usize * out_h as usize * ch);
        for oy in 0..out_h {
            let sy = (oy * stride) as usize;
            for ox in 0..out_w {
                let sx = (ox * stride) as usize;
                let idx = (sy * self.width as usize + sx) * ch;
                out.extend_from_slice(&self.data[idx..idx + ch]);
            }
        }
        Frame {
            data: out,
            camera_id: self.camera_id.clone(),
            width: out_w,
            height: out_h,
            channels: self.channels,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Copy of this frame with box outlines drawn over the pixels.
    ///
    /// Boxes are clipped to the frame; the original buffer is untouched.
    pub fn annotated(&self, boxes: &[crate::BoundingBox]) -> Frame {
        let mut out = self.clone();
        for b in boxes {
            out.draw_outline(b);
        }
        out
    }

    fn draw_outline(&mut self, b: &crate::BoundingBox) {
        if b.width <= 0.0 || b.height <= 0.0 {
            return;
        }
        let x0 = b.x.max(0.0) as u32;
        let y0 = b.y.max(0.0) as u32;
        let x1 = ((b.x + b.width) as u32).min(self.width.saturating_sub(1));
        let y1 = ((b.y + b.height) as u32).min(self.height.saturating_sub(1));
        if x0 > x1 || y0 > y1 || x0 >= self.width || y0 >= self.height {
            return;
        }
        for x in x0..=x1 {
            self.put_marker(x, y0);
            self.put_marker(x, y1);
        }
        for y in y0..=y1 {
            self.put_marker(x0, y);
            self.put_marker(x1, y);
        }
    }

    fn put_marker(&mut self, x: u32, y: u32) {
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        if self.channels == 1 {
            self.data[idx] = 255;
        } else {
            self.data[idx] = 255;
            self.data[idx + 1] = 32;
            self.data[idx + 2] = 32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn gray_frame(w: u32, h: u32, fill: u8) -> Frame {
        Frame::new("cam:test", w, h, 1, 0, vec![fill; (w * h) as usize]).unwrap()
    }

    #[test]
    fn new_rejects_mismatched_length() {
        assert!(Frame::new("cam:test", 4, 4, 1, 0, vec![0u8; 15]).is_err());
        assert!(Frame::new("cam:test", 4, 4, 3, 0, vec![0u8; 48]).is_ok());
    }

    #[test]
    fn new_rejects_zero_dims_and_odd_channels() {
        assert!(Frame::new("cam:test", 0, 4, 1, 0, vec![]).is_err());
        assert!(Frame::new("cam:test", 4, 4, 2, 0, vec![0u8; 32]).is_err());
    }

    #[test]
    fn mean_luma_of_uniform_gray() {
        let f = gray_frame(8, 8, 128);
        assert!((f.mean_luma() - 128.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn mean_luma_rgb_white_is_one() {
        let f = Frame::new("cam:test", 2, 2, 3, 0, vec![255u8; 12]).unwrap();
        assert!(f.mean_luma() > 0.99);
    }

    #[test]
    fn downsample_halves_dimensions() {
        let f = gray_frame(8, 6, 7);
        let d = f.downsample(2);
        assert_eq!(d.width, 4);
        assert_eq!(d.height, 3);
        assert_eq!(d.byte_len(), 12);
        assert_eq!(d.camera_id, "cam:test");
    }

    #[test]
    fn downsample_stride_one_is_identity() {
        let f = gray_frame(5, 5, 9);
        let d = f.downsample(1);
        assert_eq!(d.byte_len(), f.byte_len());
        assert_eq!(d.pixels(), f.pixels());
    }

    #[test]
    fn annotate_leaves_original_untouched() {
        let f = gray_frame(16, 16, 0);
        let a = f.annotated(&[BoundingBox::new(2.0, 2.0, 6.0, 6.0)]);
        assert_eq!(f.pixels().iter().filter(|&&v| v != 0).count(), 0);
        assert!(a.pixels().iter().any(|&v| v == 255));
    }

    #[test]
    fn annotate_clips_out_of_range_boxes() {
        let f = gray_frame(8, 8, 0);
        // extends past the right/bottom edge, must not panic
        let a = f.annotated(&[BoundingBox::new(5.0, 5.0, 20.0, 20.0)]);
        assert!(a.pixels().iter().any(|&v| v == 255));
        // fully outside
        let b = f.annotated(&[BoundingBox::new(50.0, 50.0, 4.0, 4.0)]);
        assert_eq!(b.pixels().iter().filter(|&&v| v != 0).count(), 0);
    }

    #[test]
    fn luma_at_clamps_to_edges() {
        let f = gray_frame(4, 4, 10);
        assert_eq!(f.luma_at(100, 100), 10);
    }
}
