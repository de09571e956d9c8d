//! Local USB camera source via V4L2.
//!
//! Format negotiation asks for RGB3 and falls back to whatever the device
//! actually delivers; NV12 and YUYV streams are converted at capture. The
//! device handle and its mmap stream are bundled with `ouroboros` because
//! the stream borrows the device it came from.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::SourceStats;
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct V4l2Source {
    settings: CameraSettings,
    state: Option<DeviceState>,
    pixel_format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        Ok(Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            pixel_format: PixelFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn device_path(&self) -> &str {
        self.settings
            .url
            .strip_prefix("usb://")
            .unwrap_or(&self.settings.url)
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = self.device_path().to_string();
        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("capture: {} failed to set format on {}: {}", self.settings.id, path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("capture: {} failed to set fps on {}: {}", self.settings.id, path, err);
            }
        }

        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .with_context(|| format!("device {} offers no deliverable format", path))?;
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "capture: {} connected to {} ({}x{} {:?})",
            self.settings.id,
            path,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let capture = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))
        });
        let raw = match capture {
            Ok(raw) => raw,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let rgb = normalize_to_rgb(&raw, self.active_width, self.active_height, self.pixel_format)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Frame::new(
            self.settings.id.clone(),
            self.active_width,
            self.active_height,
            3,
            crate::now_ms()?,
            rgb,
        )
    }

    pub fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            endpoint: self.settings.url.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}
