//! Evidence capture for safety events.
//!
//! Every qualifying event records a SHA-256 digest of the triggering frame.
//! With the `evidence-jpeg` feature the frame is also encoded to a JPEG
//! under the evidence directory and the file path lands on the event.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::frame::Frame;

/// Digest and optional snapshot path for one safety event.
#[derive(Clone, Debug)]
pub struct EvidenceRecord {
    pub path: Option<String>,
    pub sha256: String,
}

pub struct EvidenceWriter {
    dir: PathBuf,
}

impl EvidenceWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create evidence directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Digest the frame and, when JPEG support is compiled in, write a
    /// snapshot named after the camera, zone and timestamp.
    pub fn capture(&self, frame: &Frame, zone_id: &str) -> Result<EvidenceRecord> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let sha256 = hex::encode(digest);
        let path = self.write_snapshot(frame, zone_id)?;
        Ok(EvidenceRecord { path, sha256 })
    }

    #[cfg(feature = "evidence-jpeg")]
    fn write_snapshot(&self, frame: &Frame, zone_id: &str) -> Result<Option<String>> {
        use image::codecs::jpeg::JpegEncoder;

        let color = match frame.channels {
            1 => image::ExtendedColorType::L8,
            3 => image::ExtendedColorType::Rgb8,
            _ => return Ok(None),
        };
        let name = snapshot_name(&frame.camera_id, zone_id, frame.timestamp_ms);
        let path = self.dir.join(&name);
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create evidence file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, 85)
            .encode(frame.pixels(), frame.width, frame.height, color)
            .with_context(|| format!("encode evidence jpeg {}", name))?;
        Ok(Some(path.to_string_lossy().into_owned()))
    }

    #[cfg(not(feature = "evidence-jpeg"))]
    fn write_snapshot(&self, frame: &Frame, zone_id: &str) -> Result<Option<String>> {
        let name = snapshot_name(&frame.camera_id, zone_id, frame.timestamp_ms);
        log::debug!(
            "jpeg support not compiled in, skipping evidence snapshot {}",
            self.dir.join(name).display()
        );
        Ok(None)
    }
}

/// Ids carry a `kind:` prefix; colons do not belong in filenames.
fn snapshot_name(camera_id: &str, zone_id: &str, timestamp_ms: u64) -> String {
    format!(
        "{}_{}_{}.jpg",
        camera_id.replace(':', "-"),
        zone_id.replace(':', "-"),
        timestamp_ms
    )
}
