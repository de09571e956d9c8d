//! safevisiond - multi-camera safety monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file plus SAFEVISION_* overrides)
//! 2. Opens the SQLite store and seeds zones from the optional zones file
//! 3. Starts one capture thread per enabled camera
//! 4. Runs the adaptive pipeline: motion gate, inference, tracking, zones
//! 5. Routes alerts, logs health, and prunes events past retention
//!
//! SIGINT/SIGTERM triggers an ordered shutdown: cameras stop first, the
//! pipeline drains, then the alert router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use safevision::capture::manager::DEFAULT_STOP_TIMEOUT;
use safevision::{
    now_ms, AdaptivePipeline, AlertRouter, CameraManager, EngineManager, EvidenceWriter,
    FrameDistributor, LogAlertHandler, MonitorConfig, MonitorStore, SafetyEventHandler,
    SafetyMonitor, SqliteMonitorStore, TrackerSet, Zone,
};

const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MonitorConfig::load()?;
    log::info!(
        "safevisiond {} starting: {} camera(s), engine '{}', db {}",
        env!("CARGO_PKG_VERSION"),
        config.cameras.len(),
        config.engine.engine,
        config.db_path
    );

    let store: Arc<Mutex<dyn MonitorStore>> =
        Arc::new(Mutex::new(SqliteMonitorStore::open(&config.db_path)?));

    seed_zones(&store, config.zones_file.as_deref())?;

    let tracker_settings = {
        let stored = store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?
            .load_tracker_config()?;
        match stored {
            Some(settings) => {
                log::info!(
                    "using stored tracker configuration ('{}')",
                    settings.algorithm
                );
                settings
            }
            None => config.tracker.clone(),
        }
    };
    let trackers = Arc::new(Mutex::new(TrackerSet::new(tracker_settings)?));

    let mut engine = EngineManager::from_settings(&config.engine)?;
    engine.load().context("load inference engines")?;
    log::info!("inference engine '{}' ready", engine.active_name());
    let engine = Arc::new(Mutex::new(engine));

    let evidence = match &config.evidence_dir {
        Some(dir) => {
            let writer = EvidenceWriter::new(dir)?;
            log::info!("evidence snapshots under {}", writer.dir().display());
            Some(writer)
        }
        None => None,
    };

    let handlers: Vec<Box<dyn SafetyEventHandler>> = vec![Box::new(LogAlertHandler)];
    let monitor = Arc::new(SafetyMonitor::new(
        store.clone(),
        AlertRouter::spawn(handlers),
        &config.zones,
        evidence,
    ));
    let zone_count = monitor.refresh_zones()?;
    log::info!("{} evaluable zone(s) loaded", zone_count);

    let pipeline = Arc::new(AdaptivePipeline::spawn(
        &config.pipeline,
        engine.clone(),
        trackers,
        monitor.clone(),
        None,
    )?);

    let distributor = Arc::new(FrameDistributor::new(
        config.pipeline.display_rate_divisor,
        config.pipeline.display_downsample,
    ));
    distributor.subscribe_inference(pipeline.clone());

    let cameras = CameraManager::start(&config.cameras, distributor)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("install signal handler")?;
    }

    log::info!("safevisiond running ({} camera(s) live)", cameras.active_cameras());

    let mut last_health = Instant::now();
    let mut last_prune = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));

        if last_health.elapsed() >= HEALTH_INTERVAL {
            last_health = Instant::now();
            cameras.log_health();
            let snapshot = pipeline.snapshot();
            log::debug!(
                "pipeline: {} processed, {} dropped, queue {}",
                snapshot.processed,
                snapshot.dropped,
                snapshot.queue_depth
            );
            let status = match engine.lock() {
                Ok(manager) => Some(manager.status()),
                Err(_) => None,
            };
            if let Some(status) = status.filter(|s| s.on_fallback) {
                log::warn!(
                    "inference running on fallback engine '{}' ({} fatal faults)",
                    status.active,
                    status.fatal_faults
                );
            }
        }

        if last_prune.elapsed() >= PRUNE_INTERVAL {
            last_prune = Instant::now();
            if let Err(e) = prune_events(&store, config.retention) {
                log::warn!("retention pruning failed: {:#}", e);
            }
        }
    }

    log::info!("shutdown signal received, stopping cameras");
    cameras.stop_all(DEFAULT_STOP_TIMEOUT)?;
    log::info!("draining pipeline");
    pipeline.shutdown(PIPELINE_DRAIN_TIMEOUT)?;
    monitor.router().shutdown();
    let dropped_alerts = monitor.router().dropped_alerts();
    if dropped_alerts > 0 {
        log::warn!("{} alert(s) were dropped during this run", dropped_alerts);
    }
    log::info!("safevisiond stopped");
    Ok(())
}

/// Seed operator-authored zone definitions into the store. Zones created
/// through other tooling survive; this only upserts the listed ids.
fn seed_zones(store: &Arc<Mutex<dyn MonitorStore>>, zones_file: Option<&str>) -> Result<()> {
    let Some(path) = zones_file else {
        return Ok(());
    };
    let json =
        std::fs::read_to_string(path).with_context(|| format!("read zones file {}", path))?;
    let zones: Vec<Zone> =
        serde_json::from_str(&json).with_context(|| format!("parse zones file {}", path))?;
    let mut guard = store.lock().map_err(|_| anyhow!("store lock poisoned"))?;
    for zone in &zones {
        guard
            .save_zone(zone)
            .with_context(|| format!("seed zone {}", zone.zone_id))?;
    }
    log::info!("seeded {} zone(s) from {}", zones.len(), path);
    Ok(())
}

fn prune_events(store: &Arc<Mutex<dyn MonitorStore>>, retention: Duration) -> Result<()> {
    let cutoff = now_ms()?.saturating_sub(retention.as_millis() as u64);
    let pruned = store
        .lock()
        .map_err(|_| anyhow!("store lock poisoned"))?
        .prune_events_before(cutoff)?;
    if pruned > 0 {
        log::info!("pruned {} event(s) past retention", pruned);
    }
    Ok(())
}
