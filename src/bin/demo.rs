//! demo - end-to-end synthetic run of the monitoring chain
//!
//! Renders a synthetic walking figure, runs it through capture, motion
//! gating, stub inference, tracking, and zone evaluation, and prints each
//! alert as the figure crosses a danger zone. No camera, model file, or
//! database is needed.

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use safevision::capture::manager::DEFAULT_STOP_TIMEOUT;
use safevision::{
    AdaptivePipeline, AlertRouter, CameraManager, CameraSettings, CameraTransport,
    ChannelAlertHandler, EngineManager, EngineSettings, FrameDistributor, InMemoryMonitorStore,
    LogAlertHandler, MonitorStore, PipelineSettings, SafetyEventHandler, SafetyMonitor,
    TrackerSet, TrackerSettings, Zone, ZoneCalibration, ZoneEngineSettings, ZoneKind,
};

#[derive(Parser, Debug)]
#[command(name = "demo", about = "Synthetic end-to-end run of the monitoring chain")]
struct Args {
    /// How long to run the synthetic camera.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Synthetic camera frame rate.
    #[arg(long, default_value_t = 10)]
    fps: u32,
}

/// The synthetic figure walks across a 320x240 scene with its feet near
/// y = 216 px. At 40 px/m that is world y = 5.4 m; this zone covers the
/// middle of the walk, so the figure enters, leaves, and re-enters as it
/// wraps around.
fn demo_zone() -> Zone {
    Zone {
        zone_id: "zone:press_brake".to_string(),
        camera_id: "cam:demo".to_string(),
        name: "Press brake".to_string(),
        kind: ZoneKind::Danger,
        floor_points: vec![(3.0, 4.5), (5.0, 4.5), (5.0, 6.0), (3.0, 6.0)],
        height_m: 2.0,
        calibration: ZoneCalibration {
            pixels_per_meter: 40.0,
            frame_width: 320,
            frame_height: 240,
        },
        enabled: true,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 || args.fps > 60 {
        return Err(anyhow!("fps must be in 1..=60"));
    }

    stage("seed in-memory store");
    let store: Arc<Mutex<dyn MonitorStore>> = Arc::new(Mutex::new(InMemoryMonitorStore::new()));
    store
        .lock()
        .map_err(|_| anyhow!("store lock poisoned"))?
        .save_zone(&demo_zone())?;

    stage("start engine, tracker, monitor");
    let engine_settings = EngineSettings {
        engine: "stub".to_string(),
        model_path: None,
        input_width: 320,
        input_height: 240,
        prefer_gpu: false,
        confidence_threshold: 0.5,
        nms_threshold: 0.45,
    };
    let mut engine = EngineManager::from_settings(&engine_settings)?;
    engine.load()?;
    let engine = Arc::new(Mutex::new(engine));
    let trackers = Arc::new(Mutex::new(TrackerSet::new(TrackerSettings::default())?));

    let (alert_tx, alert_rx) = bounded(64);
    let handlers: Vec<Box<dyn SafetyEventHandler>> = vec![
        Box::new(LogAlertHandler),
        Box::new(ChannelAlertHandler::new(alert_tx)),
    ];
    let monitor = Arc::new(SafetyMonitor::new(
        store.clone(),
        AlertRouter::spawn(handlers),
        &ZoneEngineSettings {
            hand_alert_cooldown: Duration::from_secs(5),
        },
        None,
    ));
    monitor.refresh_zones()?;

    stage("start pipeline and synthetic camera");
    let pipeline_settings = PipelineSettings {
        queue_capacity: 4,
        workers: 1,
        motion_threshold: 0.02,
        hysteresis: Duration::from_secs(1),
        snapshot_interval: Duration::from_secs(10),
        display_rate_divisor: 3,
        display_downsample: 2,
    };
    let pipeline = Arc::new(AdaptivePipeline::spawn(
        &pipeline_settings,
        engine,
        trackers,
        monitor.clone(),
        None,
    )?);
    let distributor = Arc::new(FrameDistributor::new(
        pipeline_settings.display_rate_divisor,
        pipeline_settings.display_downsample,
    ));
    distributor.subscribe_inference(pipeline.clone());

    let camera = CameraSettings {
        id: "cam:demo".to_string(),
        transport: CameraTransport::Rtsp,
        url: "stub://demo".to_string(),
        target_fps: args.fps,
        width: 320,
        height: 240,
        enabled: true,
    };
    let cameras = CameraManager::start(std::slice::from_ref(&camera), distributor)?;

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut alerts = 0u64;
    while Instant::now() < deadline {
        match alert_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                alerts += 1;
                println!("alert: [{}] {}", event.zone_id, event.description);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    stage("shut down");
    cameras.stop_all(DEFAULT_STOP_TIMEOUT)?;
    pipeline.shutdown(Duration::from_secs(5))?;
    monitor.router().shutdown();
    for event in alert_rx.try_iter() {
        alerts += 1;
        println!("alert: [{}] {}", event.zone_id, event.description);
    }

    let snapshot = pipeline.snapshot();
    let stored = store
        .lock()
        .map_err(|_| anyhow!("store lock poisoned"))?
        .event_count()?;
    println!("demo summary:");
    println!("  frames submitted: {}", snapshot.submitted);
    println!("  frames processed: {}", snapshot.processed);
    println!("  frames dropped: {}", snapshot.dropped);
    println!("  inference runs: {}", snapshot.inference_runs);
    println!("  alerts delivered: {}", alerts);
    println!("  events stored: {}", stored);
    println!("next steps:");
    println!("  RUST_LOG=debug cargo run --bin safevisiond");
    println!("  cargo run --bin export_events -- --db safevision.db --pretty");
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
