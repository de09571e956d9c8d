//! RTSP camera source.
//!
//! Real streams decode through GStreamer (feature `rtsp-gstreamer`);
//! `stub://` URLs get a synthetic backend that renders a moving figure over
//! a dark floor, so the whole chain from capture to zone alerts runs without
//! a camera.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::{Duration, Instant};

use super::SourceStats;
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl RtspSource {
    pub fn new(settings: CameraSettings) -> Result<Self> {
        if settings.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticSource::new(settings)),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerSource::new(settings)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("RTSP streams require the rtsp-gstreamer feature")
            }
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(_) => true,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

const FLOOR_LUMA: u8 = 18;
const FIGURE_RGB: [u8; 3] = [200, 190, 180];

/// Renders a bright person-sized figure walking across a dark floor.
///
/// URL variants change the scene for tests: "static" freezes the figure in
/// place (a no-change scene for motion gating), "dark" renders pure black
/// (a connected stream with no signal).
struct SyntheticSource {
    settings: CameraSettings,
    frame_count: u64,
    step_px: u32,
    dark: bool,
}

impl SyntheticSource {
    fn new(settings: CameraSettings) -> Self {
        let step_px = if settings.url.contains("static") { 0 } else { 4 };
        let dark = settings.url.contains("dark");
        Self {
            settings,
            frame_count: 0,
            step_px,
            dark,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "capture: {} connected to {} (synthetic)",
            self.settings.id,
            self.settings.url
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let w = self.settings.width;
        let h = self.settings.height;

        if self.dark {
            let pixels = vec![0u8; (w as usize) * (h as usize) * 3];
            return Frame::new(self.settings.id.clone(), w, h, 3, crate::now_ms()?, pixels);
        }

        let mut pixels = vec![FLOOR_LUMA; (w as usize) * (h as usize) * 3];

        // Figure proportions: roughly a standing person seen from a wall
        // mount, feet near the bottom tenth of the frame.
        let fig_w = (w / 5).max(1);
        let fig_h = (h / 2).max(1);
        let travel = w.saturating_sub(fig_w).max(1);
        let x0 = (self.frame_count as u32 * self.step_px) % travel;
        let y1 = h - h / 10;
        let y0 = y1.saturating_sub(fig_h);

        for y in y0..y1 {
            for x in x0..(x0 + fig_w).min(w) {
                let idx = (y as usize * w as usize + x as usize) * 3;
                pixels[idx..idx + 3].copy_from_slice(&FIGURE_RGB);
            }
        }

        Frame::new(
            self.settings.id.clone(),
            w,
            h,
            3,
            crate::now_ms()?,
            pixels,
        )
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            endpoint: self.settings.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer-backed source
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    settings: CameraSettings,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    fn new(settings: CameraSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            settings.url
        );
        let pipeline = gstreamer::parse_launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            settings,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!(
            "capture: {} connected to {}",
            self.settings.id,
            self.settings.url
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();

        let timeout = self.frame_timeout();
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .context("pull RTSP sample")?
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Frame::new(
            self.settings.id.clone(),
            width,
            height,
            3,
            crate::now_ms()?,
            pixels,
        )
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            endpoint: self.settings.url.clone(),
        }
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            500
        } else {
            (1000 / self.settings.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(Duration::from_millis(0)) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
