//! CLI command implementations.

pub mod replay;
pub mod verify;

use patchsync_client::{PatchLog, SyncError};
use patchsync_protocol::{decode_json, Dump, ProtocolError, Update, UpdateBatch};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// An input file could not be read.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An input file is not valid JSON of the expected shape.
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: ProtocolError,
    },

    /// The `--path` argument is not a JSON pointer.
    #[error(transparent)]
    Pointer(#[from] ProtocolError),

    /// An update could not be applied; later updates were not attempted.
    #[error("replay stopped at update #{index}: {source}")]
    Stopped {
        /// Zero-based position in the update file.
        index: usize,
        /// Why the applier refused it.
        #[source]
        source: SyncError,
    },

    /// Unsupported `--format`.
    #[error("unknown output format: {0} (expected text or json)")]
    Format(String),

    /// Verification found differences.
    #[error("replay does not converge ({0} problem(s))")]
    Diverged(usize),
}

/// Output format for commands that print state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        match raw {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CommandError::Format(other.to_string())),
        }
    }
}

/// An entry of an update file: either a tagged update (`{"type": "batch",
/// "data": ...}` / `{"type": "dump", ...}`) or a bare batch.
#[derive(Deserialize)]
#[serde(untagged)]
enum UpdateEntry {
    Tagged(Update),
    Batch(UpdateBatch),
}

impl From<UpdateEntry> for Update {
    fn from(entry: UpdateEntry) -> Self {
        match entry {
            UpdateEntry::Tagged(update) => update,
            UpdateEntry::Batch(batch) => Update::Batch(batch),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CommandError> {
    fs::read(path).map_err(|source| CommandError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a dump file.
pub fn read_dump(path: &Path) -> Result<Dump, CommandError> {
    let bytes = read_file(path)?;
    decode_json(&bytes).map_err(|source| CommandError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads an update file (a JSON array).
pub fn read_updates(path: &Path) -> Result<Vec<Update>, CommandError> {
    let bytes = read_file(path)?;
    let entries: Vec<UpdateEntry> = decode_json(&bytes).map_err(|source| CommandError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(entries.into_iter().map(Update::from).collect())
}

/// Result of replaying an update file over a dump.
#[derive(Debug)]
pub struct Replay {
    /// The log after replay.
    pub log: PatchLog,
    /// Updates that took effect.
    pub applied: usize,
    /// Durable batches at or below the current sequence.
    pub skipped: usize,
    /// Set if an update was refused; nothing after it was applied.
    pub stopped: Option<CommandError>,
}

/// Loads `dump` and applies `updates` in order.
///
/// Stale durable batches are skipped the way a live client skips them. A
/// forward gap or an unappliable batch stops the replay.
pub fn replay(dump: Dump, updates: Vec<Update>) -> Replay {
    let log = PatchLog::from_dump(dump);
    let mut applied = 0;
    let mut skipped = 0;
    let mut stopped = None;

    for (index, update) in updates.into_iter().enumerate() {
        match log.apply_update(update) {
            Ok(outcome) => {
                debug!(index, ?outcome, "applied update");
                applied += 1;
            }
            Err(SyncError::SequenceGap { expected, found }) if found < expected => {
                debug!(index, found, "skipping stale batch");
                skipped += 1;
            }
            Err(source) => {
                info!(index, error = %source, "replay stopped");
                stopped = Some(CommandError::Stopped { index, source });
                break;
            }
        }
    }

    Replay {
        log,
        applied,
        skipped,
        stopped,
    }
}


#[cfg(test)]
mod tests {
    use super::test_files::json_file;
    use super::*;
    use patchsync_protocol::{JsonPath, Operation};
    use serde_json::json;

    #[test]
    fn reads_bare_and_tagged_entries() {
        let file = json_file(&json!([
            {"operations": [{"op": "replace", "path": "/a", "value": 2}], "kind": "durable", "sequence": 2},
            {"type": "batch", "data": {"operations": [], "kind": "durable", "sequence": 3}},
            {"type": "dump", "data": {"id": 9, "value": {"a": 0}}}
        ]));

        let updates = read_updates(file.path()).unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(
            updates[0],
            Update::Batch(UpdateBatch::durable(
                2,
                vec![Operation::replace(JsonPath::new(["a"]), 2)]
            ))
        );
        assert!(matches!(updates[2], Update::Dump(Dump { sequence: 9, .. })));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_dump(Path::new("/nonexistent/dump.json")).unwrap_err();
        assert!(matches!(err, CommandError::Io { .. }));
        assert!(err.to_string().contains("dump.json"));
    }

    #[test]
    fn malformed_dump_is_a_parse_error() {
        let file = json_file(&json!({"value": {}}));
        assert!(matches!(
            read_dump(file.path()),
            Err(CommandError::Parse { .. })
        ));
    }

    #[test]
    fn replay_skips_stale_and_stops_on_gap() {
        let a = JsonPath::new(["a"]);
        let updates = vec![
            Update::Batch(UpdateBatch::durable(2, vec![Operation::replace(a.clone(), 2)])),
            Update::Batch(UpdateBatch::durable(1, vec![Operation::replace(a.clone(), 99)])),
            Update::Batch(UpdateBatch::durable(4, vec![Operation::replace(a.clone(), 4)])),
            Update::Batch(UpdateBatch::durable(3, vec![Operation::replace(a.clone(), 3)])),
        ];

        let replay = replay(Dump::new(json!({"a": 1}), 1), updates);
        assert_eq!(replay.applied, 1);
        assert_eq!(replay.skipped, 1);
        assert!(matches!(
            replay.stopped,
            Some(CommandError::Stopped { index: 2, .. })
        ));
        assert_eq!(replay.log.sequence(), 2);
        assert_eq!(replay.log.get(&a), Some(json!(2)));
    }

    #[test]
    fn format_parsing() {
        assert_eq!(Format::parse("json").unwrap(), Format::Json);
        assert_eq!(Format::parse("text").unwrap(), Format::Text);
        assert!(matches!(Format::parse("yaml"), Err(CommandError::Format(_))));
    }
}
