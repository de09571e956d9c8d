use std::sync::Mutex;

use tempfile::NamedTempFile;

use safevision::{CameraTransport, MonitorConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SAFEVISION_CONFIG",
        "SAFEVISION_DB_PATH",
        "SAFEVISION_ENGINE",
        "SAFEVISION_MODEL_PATH",
        "SAFEVISION_CAMERA_URL",
        "SAFEVISION_EVIDENCE_DIR",
        "SAFEVISION_RETENTION_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "db_path": "line_a.db",
            "cameras": [
                {"id": "CAM:Dock", "url": "rtsp://10.0.0.9/main", "target_fps": 15, "width": 1280, "height": 720},
                {"id": "cam:gate", "url": "/dev/video2", "enabled": false}
            ],
            "pipeline": {"queue_capacity": 4, "workers": 2, "hysteresis_ms": 1500},
            "engine": {"engine": "tract", "model_path": "/models/yolov8n.onnx", "prefer_gpu": true},
            "tracker": {"algorithm": "iou", "max_disappear_frames": 12},
            "zones": {"hand_alert_cooldown_secs": 2},
            "retention": {"seconds": 3600},
            "evidence_dir": "/var/lib/safevision/evidence"
        }"#,
    );

    std::env::set_var("SAFEVISION_CONFIG", file.path());
    std::env::set_var("SAFEVISION_DB_PATH", "override.db");
    std::env::set_var("SAFEVISION_ENGINE", "stub");
    std::env::set_var("SAFEVISION_RETENTION_SECS", "86400");
    // Empty values are noise from the shell, not overrides.
    std::env::set_var("SAFEVISION_MODEL_PATH", "");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].id, "cam:dock");
    assert_eq!(cfg.cameras[0].transport, CameraTransport::Rtsp);
    assert_eq!(cfg.cameras[0].target_fps, 15);
    assert_eq!(cfg.cameras[0].width, 1280);
    assert_eq!(cfg.cameras[1].transport, CameraTransport::Usb);
    assert!(!cfg.cameras[1].enabled);
    assert_eq!(cfg.pipeline.queue_capacity, 4);
    assert_eq!(cfg.pipeline.workers, 2);
    assert_eq!(cfg.pipeline.hysteresis.as_millis(), 1500);
    assert_eq!(cfg.engine.engine, "stub");
    assert_eq!(cfg.engine.model_path.as_deref(), Some("/models/yolov8n.onnx"));
    assert_eq!(cfg.tracker.algorithm, "iou");
    assert_eq!(cfg.tracker.max_disappear_frames, 12);
    assert_eq!(cfg.zones.hand_alert_cooldown.as_secs(), 2);
    assert_eq!(cfg.retention.as_secs(), 86400);
    assert_eq!(
        cfg.evidence_dir.as_deref(),
        Some("/var/lib/safevision/evidence")
    );

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "safevision.db");
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].id, "cam:front");
    assert_eq!(cfg.engine.engine, "stub");
    assert_eq!(cfg.pipeline.queue_capacity, 3);
    assert!(cfg.evidence_dir.is_none());

    clear_env();
}

#[test]
fn camera_url_env_retargets_the_first_camera() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{"cameras": [
            {"id": "cam:dock", "url": "rtsp://10.0.0.9/main"},
            {"id": "cam:gate", "url": "rtsp://10.0.0.10/main"}
        ]}"#,
    );
    std::env::set_var("SAFEVISION_CONFIG", file.path());
    std::env::set_var("SAFEVISION_CAMERA_URL", "stub://bench");

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.cameras[0].url, "stub://bench");
    assert_eq!(cfg.cameras[0].transport, CameraTransport::Rtsp);
    assert_eq!(cfg.cameras[1].url, "rtsp://10.0.0.10/main");

    clear_env();
}

#[test]
fn malformed_retention_env_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SAFEVISION_RETENTION_SECS", "soon");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("SAFEVISION_RETENTION_SECS"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SAFEVISION_CONFIG", "/nonexistent/safevision.json");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("/nonexistent/safevision.json"));

    clear_env();
}

#[test]
fn out_of_range_file_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"pipeline": {"workers": 0}}"#);
    std::env::set_var("SAFEVISION_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    clear_env();
}
