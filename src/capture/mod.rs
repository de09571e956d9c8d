//! Camera capture: sources, the per-camera acquisition loop, and frame
//! distribution.
//!
//! - `rtsp`: IP cameras over RTSP, plus the `stub://` synthetic backend
//! - `v4l2`: local USB cameras (feature `capture-v4l2`)
//! - `manager`: connect negotiation, warm-up, capture threads, bounded stop
//! - `distributor`: fan-out to inference and display consumers
//!
//! Sources produce RGB24 `Frame`s regardless of what the wire delivers;
//! format conversion happens at the capture edge, never downstream.

use anyhow::Result;

use crate::config::{CameraSettings, CameraTransport};
use crate::frame::Frame;

pub mod distributor;
pub mod manager;
#[cfg(feature = "capture-v4l2")]
mod normalize;
pub mod rtsp;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

pub use distributor::{ChannelSink, DistributorStats, FrameDistributor, FrameSink};
pub use manager::{CameraHandle, CameraManager};
pub use rtsp::RtspSource;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub endpoint: String,
}

/// One camera, behind whichever transport its configuration names.
pub enum CameraSource {
    Rtsp(RtspSource),
    #[cfg(feature = "capture-v4l2")]
    Usb(V4l2Source),
}

impl CameraSource {
    pub fn open(settings: &CameraSettings) -> Result<Self> {
        match settings.transport {
            CameraTransport::Rtsp => Ok(CameraSource::Rtsp(RtspSource::new(settings.clone())?)),
            CameraTransport::Usb => {
                #[cfg(feature = "capture-v4l2")]
                {
                    Ok(CameraSource::Usb(V4l2Source::new(settings.clone())?))
                }
                #[cfg(not(feature = "capture-v4l2"))]
                {
                    anyhow::bail!("USB cameras require the capture-v4l2 feature")
                }
            }
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match self {
            CameraSource::Rtsp(source) => source.connect(),
            #[cfg(feature = "capture-v4l2")]
            CameraSource::Usb(source) => source.connect(),
        }
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        match self {
            CameraSource::Rtsp(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraSource::Usb(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self {
            CameraSource::Rtsp(source) => source.is_healthy(),
            #[cfg(feature = "capture-v4l2")]
            CameraSource::Usb(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match self {
            CameraSource::Rtsp(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CameraSource::Usb(source) => source.stats(),
        }
    }
}
