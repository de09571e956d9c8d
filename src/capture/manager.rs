//! Camera lifecycle: connect, verify, capture, stop.
//!
//! Each camera runs one capture thread. Connecting is a short negotiation:
//! bounded retries, a few warm-up frames, then a brightness check that
//! rejects sources which "connect" but deliver a dead signal. Stopping is
//! bounded too; a capture thread that will not exit is surfaced as an error
//! instead of hanging shutdown.

use anyhow::{anyhow, bail, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{CameraSource, FrameDistributor};
use crate::config::CameraSettings;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(200);
const WARMUP_FRAMES: u32 = 3;
/// Mean luma below this is treated as no signal, not a dark room.
const MIN_SIGNAL_LUMA: f32 = 0.02;
const FRAME_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct CameraShared {
    healthy: AtomicBool,
    frames: AtomicU64,
    last_frame_ms: AtomicU64,
}

/// Per-camera health as reported to the daemon loop.
#[derive(Clone, Debug)]
pub struct CameraHealth {
    pub camera_id: String,
    pub healthy: bool,
    pub frames_captured: u64,
    pub last_frame_ms: u64,
}

#[derive(Debug)]
pub struct CameraHandle {
    pub camera_id: String,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    shared: Arc<CameraShared>,
}

impl CameraHandle {
    /// Open, connect, verify, and start capturing from one camera.
    pub fn start(settings: CameraSettings, distributor: Arc<FrameDistributor>) -> Result<Self> {
        let mut source = CameraSource::open(&settings)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match source.connect() {
                Ok(()) => break,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    log::warn!(
                        "capture: {} connect attempt {}/{} failed: {:#}",
                        settings.id,
                        attempt,
                        CONNECT_ATTEMPTS,
                        e
                    );
                    std::thread::sleep(CONNECT_BACKOFF * attempt);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("connect camera {}", settings.id))
                }
            }
        }

        // Warm-up: let the stream settle, then check the last frame carries
        // an actual image.
        let mut last = None;
        for _ in 0..WARMUP_FRAMES {
            last = Some(
                source
                    .next_frame()
                    .with_context(|| format!("camera {} warm-up", settings.id))?,
            );
        }
        let brightness = last.as_ref().map(|f| f.mean_luma()).unwrap_or(0.0);
        if brightness < MIN_SIGNAL_LUMA {
            bail!(
                "camera {} delivers a zero-signal stream (mean luma {:.3})",
                settings.id,
                brightness
            );
        }

        let shared = Arc::new(CameraShared {
            healthy: AtomicBool::new(true),
            frames: AtomicU64::new(0),
            last_frame_ms: AtomicU64::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let camera_id = settings.id.clone();

        let join = {
            let shared = shared.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("capture-{}", settings.id))
                .spawn(move || capture_loop(source, settings, distributor, stop, shared))
                .context("spawn capture thread")?
        };

        Ok(Self {
            camera_id,
            stop,
            join: Some(join),
            shared,
        })
    }

    pub fn health(&self) -> CameraHealth {
        CameraHealth {
            camera_id: self.camera_id.clone(),
            healthy: self.shared.healthy.load(Ordering::Relaxed),
            frames_captured: self.shared.frames.load(Ordering::Relaxed),
            last_frame_ms: self.shared.last_frame_ms.load(Ordering::Relaxed),
        }
    }

    /// Signal the capture thread and wait for it, bounded by `timeout`.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.join.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                bail!(
                    "camera {} capture thread did not stop within {:?}",
                    self.camera_id,
                    timeout
                );
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        handle
            .join()
            .map_err(|_| anyhow!("camera {} capture thread panicked", self.camera_id))?;
        Ok(())
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        // Signal without joining; a blocking drop could wedge error paths.
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn capture_loop(
    mut source: CameraSource,
    settings: CameraSettings,
    distributor: Arc<FrameDistributor>,
    stop: Arc<AtomicBool>,
    shared: Arc<CameraShared>,
) {
    let frame_interval = Duration::from_millis(1000 / settings.target_fps.max(1) as u64);

    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        match source.next_frame() {
            Ok(frame) => {
                shared.frames.fetch_add(1, Ordering::Relaxed);
                shared.last_frame_ms.store(frame.timestamp_ms, Ordering::Relaxed);
                shared.healthy.store(source.is_healthy(), Ordering::Relaxed);
                distributor.distribute(frame);
            }
            Err(e) => {
                shared.healthy.store(false, Ordering::Relaxed);
                log::warn!("capture: {} frame error: {:#}", settings.id, e);
                std::thread::sleep(FRAME_RETRY_DELAY);
                continue;
            }
        }
        let elapsed = started.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }

    log::info!(
        "capture: {} stopped after {} frames",
        settings.id,
        shared.frames.load(Ordering::Relaxed)
    );
}

/// Starts and owns every enabled camera.
pub struct CameraManager {
    handles: Vec<CameraHandle>,
}

impl CameraManager {
    /// Start all enabled cameras. A camera that fails to start is logged
    /// and skipped; zero started cameras is fatal.
    pub fn start(cameras: &[CameraSettings], distributor: Arc<FrameDistributor>) -> Result<Self> {
        let mut handles = Vec::new();
        for settings in cameras.iter().filter(|c| c.enabled) {
            match CameraHandle::start(settings.clone(), distributor.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::error!("capture: camera {} failed to start: {:#}", settings.id, e)
                }
            }
        }
        if handles.is_empty() {
            bail!("no cameras started");
        }
        log::info!("capture: {} camera(s) running", handles.len());
        Ok(Self { handles })
    }

    pub fn active_cameras(&self) -> usize {
        self.handles.len()
    }

    pub fn health(&self) -> Vec<CameraHealth> {
        self.handles.iter().map(CameraHandle::health).collect()
    }

    pub fn log_health(&self) {
        for health in self.health() {
            log::info!(
                "capture: {} healthy={} frames={}",
                health.camera_id,
                health.healthy,
                health.frames_captured
            );
        }
    }

    /// Stop every camera. All cameras get a stop attempt even when one
    /// fails; the first error is returned.
    pub fn stop_all(mut self, timeout: Duration) -> Result<()> {
        let mut first_err = None;
        for handle in self.handles.drain(..) {
            let camera_id = handle.camera_id.clone();
            if let Err(e) = handle.stop(timeout) {
                log::error!("capture: failed to stop {}: {:#}", camera_id, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
