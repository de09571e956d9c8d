//! export_events - query recorded safety events as JSON
//!
//! Reads the event store written by safevisiond and emits the matching
//! events as a JSON array, to stdout or to a file. Camera and zone filters
//! run in-process so the store query stays a plain time-range scan.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;

use safevision::{now_ms, MonitorStore, SafetyEvent, SqliteMonitorStore};

#[derive(Parser, Debug)]
#[command(name = "export_events", about = "Export recorded safety events as JSON")]
struct Args {
    /// Path to the safevision SQLite DB
    #[arg(long, env = "SAFEVISION_DB_PATH", default_value = "safevision.db")]
    db: String,

    /// Export events from the last N seconds (ignored when --start-ms is set)
    #[arg(long, default_value_t = 86_400)]
    last: u64,

    /// Range start, epoch milliseconds
    #[arg(long)]
    start_ms: Option<u64>,

    /// Range end, epoch milliseconds (defaults to now)
    #[arg(long)]
    end_ms: Option<u64>,

    /// Keep only events from this camera (e.g. cam:entrance)
    #[arg(long)]
    camera: Option<String>,

    /// Keep only events from this zone (e.g. zone:press_brake)
    #[arg(long)]
    zone: Option<String>,

    /// Output file path; stdout when omitted
    #[arg(long)]
    output: Option<String>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn resolve_range(args: &Args, now: u64) -> (u64, u64) {
    let end = args.end_ms.unwrap_or(now);
    let start = args
        .start_ms
        .unwrap_or_else(|| end.saturating_sub(args.last.saturating_mul(1000)));
    (start, end)
}

fn matches_filters(event: &SafetyEvent, camera: Option<&str>, zone: Option<&str>) -> bool {
    if camera.is_some_and(|c| event.camera_id != c) {
        return false;
    }
    if zone.is_some_and(|z| event.zone_id != z) {
        return false;
    }
    true
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (start_ms, end_ms) = resolve_range(&args, now_ms()?);

    let mut store = SqliteMonitorStore::open(&args.db)?;
    let in_range = store.events_in_range(start_ms, end_ms)?;
    let in_range_count = in_range.len();
    let events: Vec<SafetyEvent> = in_range
        .into_iter()
        .filter(|e| matches_filters(e, args.camera.as_deref(), args.zone.as_deref()))
        .collect();

    let json = if args.pretty {
        serde_json::to_vec_pretty(&events)?
    } else {
        serde_json::to_vec(&events)?
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("write {}", path))?;
            println!(
                "{} event(s) written to {} ({} in range {}..={})",
                events.len(),
                path,
                in_range_count,
                start_ms,
                end_ms
            );
        }
        None => {
            // Summary goes to stderr so stdout stays valid JSON.
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&json)?;
            stdout.write_all(b"\n")?;
            eprintln!(
                "{} event(s) exported ({} in range {}..={})",
                events.len(),
                in_range_count,
                start_ms,
                end_ms
            );
        }
    }
    Ok(())
}
