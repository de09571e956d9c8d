use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "safevision.db";
const DEFAULT_CAMERA_ID: &str = "cam:front";
const DEFAULT_CAMERA_URL: &str = "stub://front";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_QUEUE_CAPACITY: usize = 3;
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_MOTION_THRESHOLD: f32 = 0.02;
const DEFAULT_HYSTERESIS_MS: u64 = 3_000;
const DEFAULT_SNAPSHOT_SECS: u64 = 10;
const DEFAULT_DISPLAY_RATE_DIVISOR: u64 = 3;
const DEFAULT_DISPLAY_DOWNSAMPLE: u32 = 2;
const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_HAND_COOLDOWN_SECS: u64 = 5;
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    db_path: Option<String>,
    cameras: Option<Vec<CameraConfigFile>>,
    pipeline: Option<PipelineConfigFile>,
    engine: Option<EngineConfigFile>,
    tracker: Option<TrackerSettings>,
    zones: Option<ZoneEngineConfigFile>,
    retention: Option<RetentionConfigFile>,
    evidence_dir: Option<String>,
    zones_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: String,
    url: String,
    transport: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_capacity: Option<usize>,
    workers: Option<usize>,
    motion_threshold: Option<f32>,
    hysteresis_ms: Option<u64>,
    snapshot_interval_secs: Option<u64>,
    display_rate_divisor: Option<u64>,
    display_downsample: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    engine: Option<String>,
    model_path: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    prefer_gpu: Option<bool>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ZoneEngineConfigFile {
    hand_alert_cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

/// Full daemon configuration, resolved from file + environment + defaults.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub db_path: String,
    pub cameras: Vec<CameraSettings>,
    pub pipeline: PipelineSettings,
    pub engine: EngineSettings,
    pub tracker: TrackerSettings,
    pub zones: ZoneEngineSettings,
    pub retention: Duration,
    pub evidence_dir: Option<String>,
    /// Optional JSON file of zone definitions seeded into the store at boot.
    pub zones_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraTransport {
    Rtsp,
    Usb,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub id: String,
    pub transport: CameraTransport,
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Frames admitted per worker queue; small on purpose so load sheds as
    /// dropped frames, not as latency.
    pub queue_capacity: usize,
    pub workers: usize,
    /// Fraction of changed cells that counts as motion.
    pub motion_threshold: f32,
    /// Minimum dwell in a processing level before switching again.
    pub hysteresis: Duration,
    pub snapshot_interval: Duration,
    /// Display consumers get 1 of every N frames.
    pub display_rate_divisor: u64,
    /// Pixel stride for display-path down-sampling.
    pub display_downsample: u32,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub engine: String,
    pub model_path: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub prefer_gpu: bool,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

/// Tracker tuning. Persisted as a singleton row so it survives restarts;
/// hence the serde derives where the other sections have none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub enabled: bool,
    pub algorithm: String,
    pub max_distance: f32,
    pub max_disappear_frames: u32,
    pub iou_threshold: f32,
    pub history_len: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: "centroid".to_string(),
            max_distance: 50.0,
            max_disappear_frames: 30,
            iou_threshold: 0.3,
            history_len: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneEngineSettings {
    /// Minimum gap between hand-entry alerts for the same person in the
    /// same zone.
    pub hand_alert_cooldown: Duration,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SAFEVISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let cameras = match file.cameras {
            Some(entries) => entries
                .into_iter()
                .map(camera_from_file)
                .collect::<Result<Vec<_>>>()?,
            None => vec![CameraSettings {
                id: DEFAULT_CAMERA_ID.to_string(),
                transport: CameraTransport::Rtsp,
                url: DEFAULT_CAMERA_URL.to_string(),
                target_fps: DEFAULT_CAMERA_FPS,
                width: DEFAULT_CAMERA_WIDTH,
                height: DEFAULT_CAMERA_HEIGHT,
                enabled: true,
            }],
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            queue_capacity: pipeline_file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            workers: pipeline_file.workers.unwrap_or(DEFAULT_WORKERS),
            motion_threshold: pipeline_file
                .motion_threshold
                .unwrap_or(DEFAULT_MOTION_THRESHOLD),
            hysteresis: Duration::from_millis(
                pipeline_file.hysteresis_ms.unwrap_or(DEFAULT_HYSTERESIS_MS),
            ),
            snapshot_interval: Duration::from_secs(
                pipeline_file
                    .snapshot_interval_secs
                    .unwrap_or(DEFAULT_SNAPSHOT_SECS),
            ),
            display_rate_divisor: pipeline_file
                .display_rate_divisor
                .unwrap_or(DEFAULT_DISPLAY_RATE_DIVISOR),
            display_downsample: pipeline_file
                .display_downsample
                .unwrap_or(DEFAULT_DISPLAY_DOWNSAMPLE),
        };

        let engine_file = file.engine.unwrap_or_default();
        let engine = EngineSettings {
            engine: engine_file.engine.unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            model_path: engine_file.model_path,
            input_width: engine_file.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: engine_file.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            prefer_gpu: engine_file.prefer_gpu.unwrap_or(true),
            confidence_threshold: engine_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            nms_threshold: engine_file.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
        };

        let tracker = file.tracker.unwrap_or_default();

        let zones = ZoneEngineSettings {
            hand_alert_cooldown: Duration::from_secs(
                file.zones
                    .and_then(|zones| zones.hand_alert_cooldown_secs)
                    .unwrap_or(DEFAULT_HAND_COOLDOWN_SECS),
            ),
        };

        let retention = Duration::from_secs(
            file.retention
                .and_then(|retention| retention.seconds)
                .unwrap_or(DEFAULT_RETENTION_SECS),
        );

        Ok(Self {
            db_path,
            cameras,
            pipeline,
            engine,
            tracker,
            zones,
            retention,
            evidence_dir: file.evidence_dir,
            zones_file: file.zones_file,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SAFEVISION_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(engine) = std::env::var("SAFEVISION_ENGINE") {
            if !engine.trim().is_empty() {
                self.engine.engine = engine;
            }
        }
        if let Ok(path) = std::env::var("SAFEVISION_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.engine.model_path = Some(path);
            }
        }
        if let Ok(url) = std::env::var("SAFEVISION_CAMERA_URL") {
            if !url.trim().is_empty() {
                if let Some(first) = self.cameras.first_mut() {
                    first.transport = transport_for_url(&url, None)?;
                    first.url = url;
                }
            }
        }
        if let Ok(dir) = std::env::var("SAFEVISION_EVIDENCE_DIR") {
            if !dir.trim().is_empty() {
                self.evidence_dir = Some(dir);
            }
        }
        if let Ok(retention) = std::env::var("SAFEVISION_RETENTION_SECS") {
            let seconds: u64 = retention.parse().map_err(|_| {
                anyhow!("SAFEVISION_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = std::collections::HashSet::new();
        for cam in &mut self.cameras {
            crate::validate_camera_id(&cam.id)?;
            cam.id = cam.id.to_lowercase();
            if !seen.insert(cam.id.clone()) {
                return Err(anyhow!("duplicate camera id {}", cam.id));
            }
            if cam.url.trim().is_empty() {
                return Err(anyhow!("camera {} has an empty url", cam.id));
            }
            if cam.target_fps == 0 || cam.target_fps > 60 {
                return Err(anyhow!("camera {} fps must be in 1..=60", cam.id));
            }
            if cam.width == 0 || cam.height == 0 {
                return Err(anyhow!("camera {} dimensions must be non-zero", cam.id));
            }
        }

        if !(1..=16).contains(&self.pipeline.queue_capacity) {
            return Err(anyhow!("pipeline queue_capacity must be in 1..=16"));
        }
        if !(1..=8).contains(&self.pipeline.workers) {
            return Err(anyhow!("pipeline workers must be in 1..=8"));
        }
        if !self.pipeline.motion_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.pipeline.motion_threshold)
        {
            return Err(anyhow!("pipeline motion_threshold must be in 0.0..=1.0"));
        }
        if self.pipeline.display_rate_divisor == 0 {
            return Err(anyhow!("pipeline display_rate_divisor must be >= 1"));
        }
        if self.pipeline.display_downsample == 0 {
            return Err(anyhow!("pipeline display_downsample must be >= 1"));
        }

        if self.engine.engine.trim().is_empty() {
            return Err(anyhow!("engine name must not be empty"));
        }
        if self.engine.input_width == 0 || self.engine.input_height == 0 {
            return Err(anyhow!("engine input dimensions must be non-zero"));
        }
        for (name, value) in [
            ("confidence_threshold", self.engine.confidence_threshold),
            ("nms_threshold", self.engine.nms_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("engine {} must be in 0.0..=1.0", name));
            }
        }

        if self.tracker.algorithm.trim().is_empty() {
            return Err(anyhow!("tracker algorithm must not be empty"));
        }
        if !(self.tracker.max_distance.is_finite() && self.tracker.max_distance > 0.0) {
            return Err(anyhow!("tracker max_distance must be positive"));
        }
        if self.tracker.history_len == 0 {
            return Err(anyhow!("tracker history_len must be >= 1"));
        }

        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        Ok(())
    }
}

fn camera_from_file(file: CameraConfigFile) -> Result<CameraSettings> {
    let transport = transport_for_url(&file.url, file.transport.as_deref())?;
    Ok(CameraSettings {
        id: file.id,
        transport,
        url: file.url,
        target_fps: file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
        width: file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
        height: file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        enabled: file.enabled.unwrap_or(true),
    })
}

/// Pick a transport from an explicit override or the URL scheme.
///
/// `stub://` rides the RTSP transport: it is served by the synthetic backend
/// there, so tests and demos need no extra plumbing.
fn transport_for_url(url: &str, explicit: Option<&str>) -> Result<CameraTransport> {
    if let Some(name) = explicit {
        return match name {
            "rtsp" => Ok(CameraTransport::Rtsp),
            "usb" => Ok(CameraTransport::Usb),
            other => Err(anyhow!("unknown camera transport {:?}", other)),
        };
    }
    if url.starts_with("rtsp://") || url.starts_with("stub://") {
        Ok(CameraTransport::Rtsp)
    } else if url.starts_with("usb://") || url.starts_with("/dev/video") {
        Ok(CameraTransport::Usb)
    } else {
        Err(anyhow!(
            "cannot infer transport from url {:?}; set transport explicitly",
            url
        ))
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.cameras[0].transport, CameraTransport::Rtsp);
        assert_eq!(cfg.pipeline.queue_capacity, 3);
        assert_eq!(cfg.engine.engine, "stub");
        assert!(cfg.tracker.enabled);
        assert_eq!(cfg.zones.hand_alert_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn transport_inference() {
        assert_eq!(
            transport_for_url("rtsp://10.0.0.5/stream", None).unwrap(),
            CameraTransport::Rtsp
        );
        assert_eq!(
            transport_for_url("stub://test", None).unwrap(),
            CameraTransport::Rtsp
        );
        assert_eq!(
            transport_for_url("/dev/video0", None).unwrap(),
            CameraTransport::Usb
        );
        assert_eq!(
            transport_for_url("http://nope", Some("usb")).unwrap(),
            CameraTransport::Usb
        );
        assert!(transport_for_url("http://nope", None).is_err());
        assert!(transport_for_url("rtsp://ok", Some("serial")).is_err());
    }

    #[test]
    fn parsed_file_overrides_defaults() {
        let file: MonitorConfigFile = serde_json::from_str(
            r#"{
                "db_path": "/tmp/sv.db",
                "cameras": [
                    {"id": "cam:dock", "url": "rtsp://10.0.0.9/main", "target_fps": 15}
                ],
                "pipeline": {"queue_capacity": 5, "motion_threshold": 0.1},
                "engine": {"engine": "tract", "model_path": "/models/yolo.onnx"},
                "tracker": {"algorithm": "iou"},
                "zones": {"hand_alert_cooldown_secs": 2},
                "retention": {"seconds": 3600}
            }"#,
        )
        .unwrap();
        let mut cfg = MonitorConfig::from_file(file).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.db_path, "/tmp/sv.db");
        assert_eq!(cfg.cameras[0].id, "cam:dock");
        assert_eq!(cfg.cameras[0].target_fps, 15);
        assert_eq!(cfg.pipeline.queue_capacity, 5);
        assert_eq!(cfg.engine.engine, "tract");
        assert_eq!(cfg.tracker.algorithm, "iou");
        // unspecified tracker fields keep their defaults
        assert_eq!(cfg.tracker.max_disappear_frames, 30);
        assert_eq!(cfg.zones.hand_alert_cooldown, Duration::from_secs(2));
        assert_eq!(cfg.retention, Duration::from_secs(3600));
    }

    #[test]
    fn duplicate_camera_ids_rejected() {
        let file: MonitorConfigFile = serde_json::from_str(
            r#"{"cameras": [
                {"id": "cam:a", "url": "stub://x"},
                {"id": "CAM:A", "url": "stub://y"}
            ]}"#,
        )
        .unwrap();
        let mut cfg = MonitorConfig::from_file(file).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_pipeline_settings_rejected() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.pipeline.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.pipeline.queue_capacity = 64;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.pipeline.motion_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tracker_settings_roundtrip_json() {
        let settings = TrackerSettings {
            algorithm: "iou".to_string(),
            max_distance: 80.0,
            ..TrackerSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: TrackerSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.algorithm, "iou");
        assert_eq!(back.max_distance, 80.0);
        assert_eq!(back.history_len, 50);
    }
}
