//! Safety events and the alert fan-out path.
//!
//! Zone evaluation runs on the frame-processing hot path, so alert delivery
//! is decoupled through a bounded channel and a dedicated router thread.
//! Persistence happens before routing (an alert is never delivered without a
//! stored event); delivery failures are logged and never stall evaluation.

use anyhow::Result;
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crate::zone::{Landmark, ZoneKind};
use crate::BoundingBox;

/// Capacity of the alert channel. Alerts are rare relative to frames, so a
/// backlog this deep means a wedged handler, and dropping is the right call.
const ALERT_QUEUE_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyEventKind {
    /// A person entered a zone (any landmark).
    ZoneEntry,
    /// A person already in a zone moved a hand into it.
    HandZoneEntry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Warning,
    Critical,
}

impl EventSeverity {
    pub fn for_zone(kind: ZoneKind) -> Self {
        match kind {
            ZoneKind::Warning => EventSeverity::Warning,
            ZoneKind::Danger => EventSeverity::Critical,
        }
    }
}

/// One safety violation, as persisted and as delivered to handlers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub kind: SafetyEventKind,
    pub severity: EventSeverity,
    pub camera_id: String,
    pub zone_id: String,
    pub zone_kind: ZoneKind,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub landmark: Landmark,
    pub track_id: Option<u64>,
    pub timestamp_ms: u64,
    pub description: String,
    pub evidence_path: Option<String>,
    pub evidence_sha256: Option<String>,
}

/// Downstream alert consumer: log sink, andon light, PLC bridge, test probe.
///
/// Handlers run on the router thread. A failing handler is logged and
/// skipped for that event; it does not affect its siblings.
pub trait SafetyEventHandler: Send {
    fn name(&self) -> &'static str;
    fn handle(&mut self, event: &SafetyEvent) -> Result<()>;
}

/// Default handler: severity-leveled log lines.
pub struct LogAlertHandler;

impl SafetyEventHandler for LogAlertHandler {
    fn name(&self) -> &'static str {
        "log"
    }

    fn handle(&mut self, event: &SafetyEvent) -> Result<()> {
        match event.severity {
            EventSeverity::Critical => log::error!(
                "SAFETY ALERT [{}] {}: {}",
                event.zone_id,
                event.landmark.label(),
                event.description
            ),
            EventSeverity::Warning => log::warn!(
                "safety warning [{}] {}: {}",
                event.zone_id,
                event.landmark.label(),
                event.description
            ),
        }
        Ok(())
    }
}

/// Forwards events into a channel. Used by the demo binary and tests to
/// observe alerts without a log scraper.
pub struct ChannelAlertHandler {
    sender: Sender<SafetyEvent>,
}

impl ChannelAlertHandler {
    pub fn new(sender: Sender<SafetyEvent>) -> Self {
        Self { sender }
    }
}

impl SafetyEventHandler for ChannelAlertHandler {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn handle(&mut self, event: &SafetyEvent) -> Result<()> {
        self.sender.try_send(event.clone())?;
        Ok(())
    }
}

/// Owns the router thread and the bounded alert channel.
///
/// `publish` never blocks: when the queue is full the alert is counted and
/// dropped (the event row is already persisted by then).
pub struct AlertRouter {
    sender: Mutex<Option<Sender<SafetyEvent>>>,
    join: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl AlertRouter {
    pub fn spawn(mut handlers: Vec<Box<dyn SafetyEventHandler>>) -> Self {
        let (tx, rx) = bounded::<SafetyEvent>(ALERT_QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("alert-router".to_string())
            .spawn(move || {
                for event in rx.iter() {
                    for handler in handlers.iter_mut() {
                        if let Err(e) = handler.handle(&event) {
                            log::warn!("alert handler '{}' failed: {:#}", handler.name(), e);
                        }
                    }
                }
            })
            .ok();
        if join.is_none() {
            log::error!("failed to spawn alert router thread; alerts will be dropped");
        }
        Self {
            sender: Mutex::new(join.as_ref().map(|_| tx)),
            join: Mutex::new(join),
            dropped: AtomicU64::new(0),
        }
    }

    /// Hand an event to the router thread without blocking.
    pub fn publish(&self, event: SafetyEvent) {
        let guard = match self.sender.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("alert queue full, dropping alert for {}", ev.zone_id);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped_alerts(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel and wait for the router to drain remaining alerts.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        let handle = match self.join.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("alert router thread panicked");
            }
        }
    }
}

impl Drop for AlertRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::ZoneKind;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn sample_event() -> SafetyEvent {
        SafetyEvent {
            kind: SafetyEventKind::ZoneEntry,
            severity: EventSeverity::Critical,
            camera_id: "cam:line_a".to_string(),
            zone_id: "zone:press".to_string(),
            zone_kind: ZoneKind::Danger,
            bbox: BoundingBox::new(10.0, 10.0, 40.0, 80.0),
            confidence: 0.9,
            landmark: Landmark::Feet,
            track_id: Some(3),
            timestamp_ms: 1_000,
            description: "person entered press zone".to_string(),
            evidence_path: None,
            evidence_sha256: None,
        }
    }

    struct FailingHandler;
    impl SafetyEventHandler for FailingHandler {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn handle(&mut self, _event: &SafetyEvent) -> Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    struct FlagHandler(Arc<AtomicBool>);
    impl SafetyEventHandler for FlagHandler {
        fn name(&self) -> &'static str {
            "flag"
        }
        fn handle(&mut self, _event: &SafetyEvent) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn events_reach_channel_handler() {
        let (tx, rx) = bounded(8);
        let router = AlertRouter::spawn(vec![Box::new(ChannelAlertHandler::new(tx))]);
        router.publish(sample_event());
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.zone_id, "zone:press");
        router.shutdown();
    }

    #[test]
    fn failing_handler_does_not_block_siblings() {
        let flag = Arc::new(AtomicBool::new(false));
        let router = AlertRouter::spawn(vec![
            Box::new(FailingHandler),
            Box::new(FlagHandler(flag.clone())),
        ]);
        router.publish(sample_event());
        router.shutdown();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_drains_pending_alerts() {
        let (tx, rx) = bounded(8);
        let router = AlertRouter::spawn(vec![Box::new(ChannelAlertHandler::new(tx))]);
        for _ in 0..5 {
            router.publish(sample_event());
        }
        router.shutdown();
        assert_eq!(rx.try_iter().count(), 5);
    }

    #[test]
    fn severity_follows_zone_kind() {
        assert_eq!(
            EventSeverity::for_zone(ZoneKind::Warning),
            EventSeverity::Warning
        );
        assert_eq!(
            EventSeverity::for_zone(ZoneKind::Danger),
            EventSeverity::Critical
        );
    }
}
