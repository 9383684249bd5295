//! Verify command implementation.

use super::{read_dump, read_updates, replay, CommandError};
use patchsync_protocol::{Dump, JsonPath, Update};
use serde_json::Value;
use std::path::Path;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of updates that took effect.
    pub applied: usize,
    /// Number of stale batches skipped.
    pub skipped: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(
    dump_path: &Path,
    updates_path: &Path,
    expected_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let dump = read_dump(dump_path)?;
    let updates = read_updates(updates_path)?;
    let expected = read_dump(expected_path)?;

    println!(
        "Replaying {} update(s) from sequence {} towards {}",
        updates.len(),
        dump.sequence,
        expected.sequence
    );
    let result = check(dump, updates, &expected);

    println!("Applied: {}  Skipped: {}", result.applied, result.skipped);
    for error in &result.errors {
        println!("  - {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Replay converges");
        Ok(())
    } else {
        println!("✗ Replay does not converge");
        Err(CommandError::Diverged(result.errors.len()).into())
    }
}

/// Replays `updates` over `dump` and compares the outcome to `expected`.
pub fn check(dump: Dump, updates: Vec<Update>, expected: &Dump) -> VerifyResult {
    let outcome = replay(dump, updates);
    let mut errors = Vec::new();

    if let Some(ref stopped) = outcome.stopped {
        errors.push(stopped.to_string());
    }

    let snapshot = outcome.log.snapshot();
    if snapshot.pending > 0 {
        errors.push(format!(
            "{} speculative patch(es) never resolved",
            snapshot.pending
        ));
    }
    if snapshot.sequence != expected.sequence {
        errors.push(format!(
            "sequence mismatch: replayed {}, expected {}",
            snapshot.sequence, expected.sequence
        ));
    }
    if let Some(path) = first_difference(&snapshot.tree, &expected.tree, JsonPath::root()) {
        errors.push(format!("trees differ at {}", display_pointer(&path)));
    }

    VerifyResult {
        applied: outcome.applied,
        skipped: outcome.skipped,
        errors,
    }
}

fn display_pointer(path: &JsonPath) -> String {
    if path.is_root() {
        "the root".to_string()
    } else {
        path.to_string()
    }
}

/// Finds the shallowest-first, key-ordered location where two trees differ.
fn first_difference(actual: &Value, expected: &Value, at: JsonPath) -> Option<JsonPath> {
    match (actual, expected) {
        (Value::Object(left), Value::Object(right)) => {
            let extra = right.keys().filter(|key| !left.contains_key(*key));
            for key in left.keys().chain(extra) {
                match (left.get(key), right.get(key)) {
                    (Some(l), Some(r)) => {
                        if let Some(found) = first_difference(l, r, at.child(key)) {
                            return Some(found);
                        }
                    }
                    _ => return Some(at.child(key)),
                }
            }
            None
        }
        (Value::Array(left), Value::Array(right)) if left.len() == right.len() => left
            .iter()
            .zip(right)
            .enumerate()
            .find_map(|(index, (l, r))| first_difference(l, r, at.child(index))),
        _ if actual == expected => None,
        _ => Some(at),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_files::json_file;
    use super::*;
    use patchsync_protocol::{Operation, UpdateBatch};
    use serde_json::json;

    fn name_batch(sequence: u64, name: &str) -> Update {
        Update::Batch(UpdateBatch::durable(
            sequence,
            vec![Operation::replace(JsonPath::new(["name"]), name)],
        ))
    }

    #[test]
    fn converging_replay_passes() {
        let dump = Dump::new(json!({"name": "a", "apps": [1, 2]}), 1);
        let expected = Dump::new(json!({"name": "c", "apps": [1, 2]}), 3);
        let result = check(dump, vec![name_batch(2, "b"), name_batch(3, "c")], &expected);
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.applied, 2);
    }

    #[test]
    fn reports_sequence_and_tree_mismatch() {
        let dump = Dump::new(json!({"name": "a"}), 1);
        let expected = Dump::new(json!({"name": "c"}), 3);
        let result = check(dump, vec![name_batch(2, "b")], &expected);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("sequence mismatch"));
        assert!(result.errors[1].contains("/name"));
    }

    #[test]
    fn reports_gap() {
        let dump = Dump::new(json!({"name": "a"}), 1);
        let expected = Dump::new(json!({"name": "c"}), 3);
        let result = check(dump, vec![name_batch(3, "c")], &expected);
        assert!(result.errors[0].contains("sequence gap"));
    }

    #[test]
    fn first_difference_locations() {
        let root = JsonPath::root;
        assert_eq!(first_difference(&json!({"a": 1}), &json!({"a": 1}), root()), None);
        assert_eq!(
            first_difference(&json!({"a": {"b": [1, 2]}}), &json!({"a": {"b": [1, 3]}}), root()),
            Some(JsonPath::new(["a", "b"]).child(1usize))
        );
        assert_eq!(
            first_difference(&json!({"a": 1}), &json!({"a": 1, "z": 2}), root()),
            Some(JsonPath::new(["z"]))
        );
        assert_eq!(
            first_difference(&json!([1]), &json!([1, 2]), root()),
            Some(root())
        );
    }

    #[test]
    fn run_against_files() {
        let dump = json_file(&json!({"id": 1, "value": {"name": "a"}}));
        let updates = json_file(&json!([
            {"operations": [{"op": "replace", "path": "/name", "value": "b"}], "kind": "durable", "sequence": 2}
        ]));
        let good = json_file(&json!({"id": 2, "value": {"name": "b"}}));
        let bad = json_file(&json!({"id": 2, "value": {"name": "x"}}));

        run(dump.path(), updates.path(), good.path()).unwrap();
        let err = run(dump.path(), updates.path(), bad.path()).unwrap_err();
        assert!(err.to_string().contains("does not converge"));
    }
}
