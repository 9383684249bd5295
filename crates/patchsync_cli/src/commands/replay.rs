//! Replay command implementation.

use super::{read_dump, read_updates, replay, CommandError, Format, Replay};
use patchsync_protocol::{get, JsonPath, Sequence};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Replay summary for output.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Sequence after replay.
    pub sequence: Sequence,
    /// Updates that took effect.
    pub applied: usize,
    /// Stale batches that were skipped.
    pub skipped: usize,
    /// Speculative patches still pending.
    pub pending: usize,
    /// Why the replay stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
    /// Pointer that was read.
    pub path: String,
    /// Value at `path`; absent if nothing is there.
    pub value: Option<Value>,
}

impl ReplayReport {
    fn new(replay: &Replay, path: &JsonPath) -> Self {
        let snapshot = replay.log.snapshot();
        Self {
            sequence: snapshot.sequence,
            applied: replay.applied,
            skipped: replay.skipped,
            pending: snapshot.pending,
            stopped: replay.stopped.as_ref().map(ToString::to_string),
            path: path.to_string(),
            value: get(&snapshot.tree, path).cloned(),
        }
    }
}

/// Runs the replay command.
pub fn run(
    dump_path: &Path,
    updates_path: Option<&Path>,
    path: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let pointer = match path {
        Some(raw) => JsonPath::parse(raw).map_err(CommandError::from)?,
        None => JsonPath::root(),
    };

    let dump = read_dump(dump_path)?;
    let updates = match updates_path {
        Some(updates_path) => read_updates(updates_path)?,
        None => Vec::new(),
    };

    let outcome = replay(dump, updates);
    let report = ReplayReport::new(&outcome, &pointer);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(&report)?,
    }

    match outcome.stopped {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_text_output(report: &ReplayReport) -> Result<(), serde_json::Error> {
    println!("Replay");
    println!("================");
    println!("Sequence:  {}", report.sequence);
    println!("Applied:   {}", report.applied);
    println!("Skipped:   {}", report.skipped);
    if report.pending > 0 {
        println!("Pending:   {} speculative", report.pending);
    }
    if let Some(ref reason) = report.stopped {
        println!("Stopped:   {}", reason);
    }
    println!();

    match report.value {
        Some(ref value) => println!("{} = {}", report.path, serde_json::to_string_pretty(value)?),
        None => println!("{} is absent", report.path),
    }
    Ok(())
}
