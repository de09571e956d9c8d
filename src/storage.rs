//! Persistence for zones, safety events, and tracker configuration.
//!
//! One trait, two implementations: SQLite for deployments, in-memory for
//! tests and the demo binary. Payloads are stored as JSON documents with the
//! columns the queries need lifted out, so the schema stays stable as event
//! fields evolve.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;

use crate::config::TrackerSettings;
use crate::zone::{SafetyEvent, Zone};

pub trait MonitorStore: Send {
    /// Insert or replace a zone definition. Rejects structurally invalid
    /// zones; semantic degradation (disabled, unevaluable) is the safety
    /// monitor's concern.
    fn save_zone(&mut self, zone: &Zone) -> Result<()>;

    fn get_zone(&mut self, zone_id: &str) -> Result<Option<Zone>>;

    /// Returns whether a zone was actually removed.
    fn delete_zone(&mut self, zone_id: &str) -> Result<bool>;

    fn load_zones(&mut self) -> Result<Vec<Zone>>;

    /// Append a safety event, returning its row id.
    fn append_event(&mut self, event: &SafetyEvent) -> Result<i64>;

    /// Events with `start_ms <= created_at <= end_ms`, oldest first.
    fn events_in_range(&mut self, start_ms: u64, end_ms: u64) -> Result<Vec<SafetyEvent>>;

    fn event_count(&mut self) -> Result<u64>;

    /// Delete events older than the cutoff, returning how many went.
    fn prune_events_before(&mut self, cutoff_ms: u64) -> Result<usize>;

    /// The tracker configuration is a singleton row; save overwrites.
    fn save_tracker_config(&mut self, settings: &TrackerSettings) -> Result<()>;

    fn load_tracker_config(&mut self) -> Result<Option<TrackerSettings>>;
}

/// Open a database path, honoring SQLite URI syntax for `file:` paths.
///
/// URI paths are how tests share an in-memory database across connections.
pub fn open_db_connection(db_path: &str) -> Result<Connection> {
    let conn = if db_path.starts_with("file:") {
        Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?
    } else {
        Connection::open(db_path)?
    };
    Ok(conn)
}

/// A unique shared-memory SQLite URI. Each call gets a fresh database.
pub fn shared_memory_uri(label: &str) -> String {
    let nonce: u64 = rand::random();
    format!("file:{}_{:x}?mode=memory&cache=shared", label, nonce)
}

pub struct SqliteMonitorStore {
    conn: Connection,
}

impl SqliteMonitorStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS zones (
              zone_id TEXT PRIMARY KEY,
              camera_id TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS safety_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              camera_id TEXT NOT NULL,
              zone_id TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracker_config (
              id INTEGER PRIMARY KEY CHECK (id = 1),
              payload_json TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_safety_events_created
              ON safety_events(created_at);
            "#,
        )?;
        Ok(())
    }
}

impl MonitorStore for SqliteMonitorStore {
    fn save_zone(&mut self, zone: &Zone) -> Result<()> {
        zone.validate()?;
        let payload_json = serde_json::to_string(zone)?;
        let updated_at = to_i64(crate::now_ms()?)?;
        self.conn.execute(
            r#"
            INSERT INTO zones(zone_id, camera_id, payload_json, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(zone_id) DO UPDATE SET
              camera_id = excluded.camera_id,
              payload_json = excluded.payload_json,
              updated_at = excluded.updated_at
            "#,
            params![zone.zone_id, zone.camera_id, payload_json, updated_at],
        )?;
        Ok(())
    }

    fn get_zone(&mut self, zone_id: &str) -> Result<Option<Zone>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM zones WHERE zone_id = ?1")?;
        let mut rows = stmt.query(params![zone_id])?;
        if let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let zone: Zone = serde_json::from_str(&payload)?;
            return Ok(Some(zone));
        }
        Ok(None)
    }

    fn delete_zone(&mut self, zone_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM zones WHERE zone_id = ?1", params![zone_id])?;
        Ok(deleted > 0)
    }

    fn load_zones(&mut self) -> Result<Vec<Zone>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM zones ORDER BY zone_id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let zone: Zone = serde_json::from_str(&payload)?;
            out.push(zone);
        }
        Ok(out)
    }

    fn append_event(&mut self, event: &SafetyEvent) -> Result<i64> {
        let payload_json = serde_json::to_string(event)?;
        let created_at = to_i64(event.timestamp_ms)?;
        self.conn.execute(
            r#"
            INSERT INTO safety_events(created_at, camera_id, zone_id, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![created_at, event.camera_id, event.zone_id, payload_json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn events_in_range(&mut self, start_ms: u64, end_ms: u64) -> Result<Vec<SafetyEvent>> {
        let start = to_i64(start_ms)?;
        let end = to_i64(end_ms)?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT payload_json FROM safety_events
            WHERE created_at >= ?1 AND created_at <= ?2
            ORDER BY id ASC
            "#,
        )?;
        let mut rows = stmt.query(params![start, end])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let event: SafetyEvent = serde_json::from_str(&payload)?;
            out.push(event);
        }
        Ok(out)
    }

    fn event_count(&mut self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM safety_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn prune_events_before(&mut self, cutoff_ms: u64) -> Result<usize> {
        let cutoff = to_i64(cutoff_ms)?;
        let deleted = self.conn.execute(
            "DELETE FROM safety_events WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn save_tracker_config(&mut self, settings: &TrackerSettings) -> Result<()> {
        let payload_json = serde_json::to_string(settings)?;
        let updated_at = to_i64(crate::now_ms()?)?;
        self.conn.execute(
            r#"
            INSERT INTO tracker_config(id, payload_json, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
              payload_json = excluded.payload_json,
              updated_at = excluded.updated_at
            "#,
            params![payload_json, updated_at],
        )?;
        Ok(())
    }

    fn load_tracker_config(&mut self) -> Result<Option<TrackerSettings>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM tracker_config WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let settings: TrackerSettings = serde_json::from_str(&payload)?;
            return Ok(Some(settings));
        }
        Ok(None)
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("timestamp exceeds i64 range"))
}

#[derive(Default)]
pub struct InMemoryMonitorStore {
    zones: HashMap<String, Zone>,
    events: Vec<SafetyEvent>,
    tracker: Option<TrackerSettings>,
    next_event_id: i64,
}

impl InMemoryMonitorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonitorStore for InMemoryMonitorStore {
    fn save_zone(&mut self, zone: &Zone) -> Result<()> {
        zone.validate()?;
        self.zones.insert(zone.zone_id.clone(), zone.clone());
        Ok(())
    }

    fn get_zone(&mut self, zone_id: &str) -> Result<Option<Zone>> {
        Ok(self.zones.get(zone_id).cloned())
    }

    fn delete_zone(&mut self, zone_id: &str) -> Result<bool> {
        Ok(self.zones.remove(zone_id).is_some())
    }

    fn load_zones(&mut self) -> Result<Vec<Zone>> {
        let mut zones: Vec<Zone> = self.zones.values().cloned().collect();
        zones.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        Ok(zones)
    }

    fn append_event(&mut self, event: &SafetyEvent) -> Result<i64> {
        self.next_event_id += 1;
        self.events.push(event.clone());
        Ok(self.next_event_id)
    }

    fn events_in_range(&mut self, start_ms: u64, end_ms: u64) -> Result<Vec<SafetyEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|ev| ev.timestamp_ms >= start_ms && ev.timestamp_ms <= end_ms)
            .cloned()
            .collect())
    }

    fn event_count(&mut self) -> Result<u64> {
        Ok(self.events.len() as u64)
    }

    fn prune_events_before(&mut self, cutoff_ms: u64) -> Result<usize> {
        let before = self.events.len();
        self.events.retain(|ev| ev.timestamp_ms >= cutoff_ms);
        Ok(before - self.events.len())
    }

    fn save_tracker_config(&mut self, settings: &TrackerSettings) -> Result<()> {
        self.tracker = Some(settings.clone());
        Ok(())
    }

    fn load_tracker_config(&mut self) -> Result<Option<TrackerSettings>> {
        Ok(self.tracker.clone())
    }
}
