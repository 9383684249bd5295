//! The in-memory state tree.
//!
//! The tree keeps two layers:
//! - the confirmed tree, built only from dumps and durable batches
//! - pending speculative patches, in the order they were applied
//!
//! The visible tree is the confirmed tree with every pending patch replayed on
//! top. Rolling back a patch drops it from the list and replays the rest, so a
//! path touched only by that patch returns to its confirmed value (or to
//! absence), and overlapping patches keep their own effects.

use patchsync_protocol::{
    apply_operations, get, Dump, ExpiryToken, JsonPath, Operation, PathError, Sequence,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// A speculative patch waiting for its resolving batch.
#[derive(Debug, Clone)]
struct PendingPatch {
    token: ExpiryToken,
    operations: Vec<Operation>,
}

/// Versioned JSON document mirroring the authoritative state.
///
/// `StateTree` does no locking of its own; [`PatchLog`](crate::PatchLog)
/// serializes every mutation.
#[derive(Debug, Clone)]
pub struct StateTree {
    confirmed: Arc<Value>,
    sequence: Sequence,
    pending: Vec<PendingPatch>,
    visible: Arc<Value>,
    loaded: bool,
}

impl StateTree {
    /// Creates an empty tree at sequence 0.
    pub fn new() -> Self {
        let empty = Arc::new(Value::Null);
        Self {
            confirmed: Arc::clone(&empty),
            sequence: 0,
            pending: Vec::new(),
            visible: empty,
            loaded: false,
        }
    }

    /// Returns the visible value at `path`.
    pub fn get(&self, path: &JsonPath) -> Option<&Value> {
        get(&self.visible, path)
    }

    /// Returns the visible tree (confirmed plus speculative).
    pub fn visible(&self) -> &Arc<Value> {
        &self.visible
    }

    /// Returns the tree built from confirmed state only.
    pub fn confirmed(&self) -> &Arc<Value> {
        &self.confirmed
    }

    /// Returns the durable sequence number.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Returns true once a dump has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Returns the tokens of pending speculative patches, oldest first.
    pub fn pending_tokens(&self) -> Vec<ExpiryToken> {
        self.pending.iter().map(|p| p.token).collect()
    }

    /// Returns the number of pending speculative patches.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if `token` still has a pending patch.
    pub fn is_pending(&self, token: ExpiryToken) -> bool {
        self.pending.iter().any(|p| p.token == token)
    }

    /// Replaces everything with a dump and drops pending speculative patches.
    pub fn reset(&mut self, dump: Dump) {
        let tree = Arc::new(dump.tree);
        self.confirmed = Arc::clone(&tree);
        self.visible = tree;
        self.sequence = dump.sequence;
        self.pending.clear();
        self.loaded = true;
    }

    /// Applies a durable batch to the confirmed tree.
    ///
    /// The caller has already checked `sequence`. If `expires` names a pending
    /// patch it is dropped before the visible tree is rebuilt. On error
    /// nothing changes.
    pub fn commit(
        &mut self,
        sequence: Sequence,
        operations: &[Operation],
        expires: Option<ExpiryToken>,
    ) -> Result<(), PathError> {
        if !operations.is_empty() {
            let mut working = Value::clone(&self.confirmed);
            apply_operations(&mut working, operations)?;
            self.confirmed = Arc::new(working);
        }
        self.sequence = sequence;
        if let Some(token) = expires {
            self.pending.retain(|p| p.token != token);
        }
        self.rebuild_visible();
        Ok(())
    }

    /// Applies a speculative patch on top of the visible tree.
    pub fn push_speculative(
        &mut self,
        token: ExpiryToken,
        operations: Vec<Operation>,
    ) -> Result<(), PathError> {
        if self.is_pending(token) {
            // Re-speculating under the same token replaces the old patch.
            self.pending.retain(|p| p.token != token);
            self.rebuild_visible();
        }
        let mut working = Value::clone(&self.visible);
        apply_operations(&mut working, &operations)?;
        self.visible = Arc::new(working);
        self.pending.push(PendingPatch { token, operations });
        Ok(())
    }

    /// Rolls back the pending patch for `token`.
    ///
    /// Returns false if no such patch was pending.
    pub fn retract(&mut self, token: ExpiryToken) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.token != token);
        if self.pending.len() == before {
            return false;
        }
        self.rebuild_visible();
        true
    }

    fn rebuild_visible(&mut self) {
        if self.pending.is_empty() {
            self.visible = Arc::clone(&self.confirmed);
            return;
        }

        let mut working = Value::clone(&self.confirmed);
        for patch in &self.pending {
            // A patch whose target vanished under it stays pending (so it can
            // still be resolved) but has no visible effect.
            if let Err(err) = apply_operations(&mut working, &patch.operations) {
                warn!(token = %patch.token, error = %err, "speculative patch no longer applies");
            }
        }
        self.visible = Arc::new(working);
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status() -> JsonPath {
        JsonPath::new(["status"])
    }

    fn loaded(tree: Value, sequence: Sequence) -> StateTree {
        let mut state = StateTree::new();
        state.reset(Dump::new(tree, sequence));
        state
    }

    #[test]
    fn starts_empty() {
        let state = StateTree::new();
        assert!(!state.is_loaded());
        assert_eq!(state.sequence(), 0);
        assert_eq!(state.get(&JsonPath::root()), Some(&Value::Null));
    }

    #[test]
    fn commit_advances_confirmed() {
        let mut state = loaded(json!({"status": "stopped"}), 5);
        state
            .commit(6, &[Operation::replace(status(), "running")], None)
            .unwrap();
        assert_eq!(state.sequence(), 6);
        assert_eq!(state.get(&status()), Some(&json!("running")));
        assert!(Arc::ptr_eq(state.visible(), state.confirmed()));
    }

    #[test]
    fn failed_commit_changes_nothing() {
        let mut state = loaded(json!({"status": "stopped"}), 5);
        let err = state
            .commit(
                6,
                &[
                    Operation::replace(status(), "running"),
                    Operation::remove(JsonPath::new(["missing"])),
                ],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, PathError::NotFound { .. }));
        assert_eq!(state.sequence(), 5);
        assert_eq!(state.get(&status()), Some(&json!("stopped")));
    }

    #[test]
    fn speculative_then_retract_restores_value() {
        let mut state = loaded(json!({"status": "stopped"}), 5);
        let token = ExpiryToken::generate();

        state
            .push_speculative(token, vec![Operation::replace(status(), "running")])
            .unwrap();
        assert_eq!(state.get(&status()), Some(&json!("running")));
        assert_eq!(
            get(state.confirmed(), &status()),
            Some(&json!("stopped"))
        );

        assert!(state.retract(token));
        assert_eq!(state.get(&status()), Some(&json!("stopped")));
        assert!(!state.retract(token));
    }

    #[test]
    fn retract_restores_absence() {
        let mut state = loaded(json!({"apps": {}}), 1);
        let token = ExpiryToken::generate();
        let path = JsonPath::new(["apps", "lnd"]);

        state
            .push_speculative(token, vec![Operation::add(path.clone(), json!({"status": "installing"}))])
            .unwrap();
        assert!(state.get(&path).is_some());

        state.retract(token);
        assert_eq!(state.get(&path), None);
    }

    #[test]
    fn overlapping_patches_resolve_independently() {
        let mut state = loaded(json!({"status": "stopped"}), 5);
        let first = ExpiryToken::generate();
        let second = ExpiryToken::generate();

        state
            .push_speculative(first, vec![Operation::replace(status(), "starting")])
            .unwrap();
        state
            .push_speculative(second, vec![Operation::replace(status(), "running")])
            .unwrap();
        assert_eq!(state.get(&status()), Some(&json!("running")));

        // Rolling back the older patch keeps the newer one visible.
        state.retract(first);
        assert_eq!(state.get(&status()), Some(&json!("running")));

        state.retract(second);
        assert_eq!(state.get(&status()), Some(&json!("stopped")));
    }

    #[test]
    fn durable_commit_expires_its_patch_only() {
        let mut state = loaded(json!({"status": "stopped", "name": "a"}), 5);
        let status_token = ExpiryToken::generate();
        let name_token = ExpiryToken::generate();
        let name = JsonPath::new(["name"]);

        state
            .push_speculative(status_token, vec![Operation::replace(status(), "running")])
            .unwrap();
        state
            .push_speculative(name_token, vec![Operation::replace(name.clone(), "b")])
            .unwrap();

        state
            .commit(6, &[Operation::replace(status(), "restarting")], Some(status_token))
            .unwrap();

        assert_eq!(state.get(&status()), Some(&json!("restarting")));
        assert_eq!(state.get(&name), Some(&json!("b")));
        assert_eq!(state.pending_tokens(), vec![name_token]);
    }

    #[test]
    fn invalid_speculative_patch_is_not_recorded() {
        let mut state = loaded(json!({"status": "stopped"}), 5);
        let token = ExpiryToken::generate();
        let err = state
            .push_speculative(token, vec![Operation::remove(JsonPath::new(["nope"]))])
            .unwrap_err();
        assert!(matches!(err, PathError::NotFound { .. }));
        assert!(!state.is_pending(token));
    }

    #[test]
    fn reset_drops_pending_patches() {
        let mut state = loaded(json!({"status": "stopped"}), 5);
        let token = ExpiryToken::generate();
        state
            .push_speculative(token, vec![Operation::replace(status(), "running")])
            .unwrap();

        state.reset(Dump::new(json!({"status": "stopped"}), 9));
        assert!(state.pending_tokens().is_empty());
        assert_eq!(state.sequence(), 9);
        assert_eq!(state.get(&status()), Some(&json!("stopped")));
    }
}
