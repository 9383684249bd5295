//! The patch log applier.
//!
//! `PatchLog` is the single writer of the [`StateTree`]. Every mutation takes
//! the same lock, so batches never interleave, and a [`Snapshot`] is
//! published after each successful change. Readers only ever see published
//! snapshots.

use crate::error::{SyncError, SyncResult};
use crate::store::StateTree;
use crate::watch::PathWatch;
use parking_lot::Mutex;
use patchsync_protocol::{
    get, BatchKind, Dump, ExpiryToken, JsonPath, Operation, Sequence, Update, UpdateBatch,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A consistent view of the tree after some applied change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Visible tree (confirmed plus speculative).
    pub tree: Arc<Value>,
    /// Durable sequence number.
    pub sequence: Sequence,
    /// Number of pending speculative patches.
    pub pending: usize,
}

impl Snapshot {
    /// Returns the value at `path`.
    pub fn get(&self, path: &JsonPath) -> Option<&Value> {
        get(&self.tree, path)
    }
}

/// What applying a batch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A durable batch advanced the sequence.
    Committed {
        /// The new sequence.
        sequence: Sequence,
    },
    /// A speculative batch was recorded.
    Speculative {
        /// Token it is recorded under.
        token: ExpiryToken,
    },
    /// A retraction was processed.
    Retracted {
        /// The resolved token.
        token: ExpiryToken,
        /// False if nothing was pending under the token.
        found: bool,
    },
    /// A dump replaced the tree.
    Loaded {
        /// Sequence of the dump.
        sequence: Sequence,
    },
}

/// Serialized owner of the state tree.
///
/// # Invariants
///
/// - Durable batches are accepted only at `sequence + 1`
/// - A rejected batch leaves the tree unchanged
/// - Speculative batches never move the sequence
/// - A dump resets the sequence unconditionally
pub struct PatchLog {
    tree: Mutex<StateTree>,
    publisher: watch::Sender<Snapshot>,
    resync_required: AtomicBool,
}

impl PatchLog {
    /// Creates an empty log at sequence 0.
    pub fn new() -> Self {
        let tree = StateTree::new();
        let (publisher, _) = watch::channel(Self::snapshot_of(&tree));
        Self {
            tree: Mutex::new(tree),
            publisher,
            resync_required: AtomicBool::new(false),
        }
    }

    /// Creates a log already loaded from a dump.
    pub fn from_dump(dump: Dump) -> Self {
        let log = Self::new();
        log.load_dump(dump);
        log
    }

    fn snapshot_of(tree: &StateTree) -> Snapshot {
        Snapshot {
            tree: Arc::clone(tree.visible()),
            sequence: tree.sequence(),
            pending: tree.pending_count(),
        }
    }

    /// Publishes while the writer lock is still held, so snapshots go out in
    /// apply order.
    fn publish(&self, tree: &StateTree) {
        self.publisher.send_replace(Self::snapshot_of(tree));
    }

    /// Replaces the entire tree and sets the sequence. Never fails.
    pub fn load_dump(&self, dump: Dump) {
        let mut tree = self.tree.lock();
        let dropped = tree.pending_count();
        let sequence = dump.sequence;
        tree.reset(dump);
        self.resync_required.store(false, Ordering::SeqCst);
        info!(sequence, dropped_speculative = dropped, "loaded dump");
        self.publish(&tree);
    }

    /// Applies one batch.
    ///
    /// - Durable: must continue the sequence, otherwise
    ///   [`SyncError::SequenceGap`]. A matching `expires` token rolls back its
    ///   speculative patch first.
    /// - Speculative: applied now, recorded under its token.
    /// - Retract: rolls back the token's patch; unknown tokens are ignored.
    ///
    /// A [`SyncError::Path`] aborts the whole batch.
    pub fn apply_batch(&self, batch: UpdateBatch) -> SyncResult<Applied> {
        let mut tree = self.tree.lock();
        match batch.kind {
            BatchKind::Durable { sequence, expires } => {
                let expected = tree.sequence() + 1;
                if sequence != expected {
                    if sequence > expected {
                        self.resync_required.store(true, Ordering::SeqCst);
                    }
                    warn!(expected, found = sequence, "rejected out-of-sequence batch");
                    return Err(SyncError::SequenceGap {
                        expected,
                        found: sequence,
                    });
                }

                if let Err(err) = tree.commit(sequence, &batch.operations, expires) {
                    warn!(sequence, error = %err, "rejected durable batch");
                    self.resync_required.store(true, Ordering::SeqCst);
                    return Err(err.into());
                }
                debug!(
                    sequence,
                    operations = batch.operations.len(),
                    expires = ?expires,
                    "applied durable batch"
                );
                self.publish(&tree);
                Ok(Applied::Committed { sequence })
            }
            BatchKind::Speculative { token } => {
                if let Err(err) = tree.push_speculative(token, batch.operations) {
                    warn!(%token, error = %err, "rejected speculative batch");
                    return Err(err.into());
                }
                debug!(%token, "applied speculative batch");
                self.publish(&tree);
                Ok(Applied::Speculative { token })
            }
            BatchKind::Retract { token } => {
                let found = tree.retract(token);
                if found {
                    debug!(%token, "retracted speculative batch");
                    self.publish(&tree);
                } else {
                    debug!(%token, "retraction for unknown token");
                }
                Ok(Applied::Retracted { token, found })
            }
        }
    }

    /// Applies a batch or loads a dump, whichever the update carries.
    pub fn apply_update(&self, update: Update) -> SyncResult<Applied> {
        match update {
            Update::Batch(batch) => self.apply_batch(batch),
            Update::Dump(dump) => {
                let sequence = dump.sequence;
                self.load_dump(dump);
                Ok(Applied::Loaded { sequence })
            }
        }
    }

    /// Records `operations` under a fresh token and returns the token.
    pub fn apply_speculative(&self, operations: Vec<Operation>) -> SyncResult<ExpiryToken> {
        let token = ExpiryToken::generate();
        self.apply_batch(UpdateBatch::speculative(token, operations))?;
        Ok(token)
    }

    /// Rolls back the speculative patch for `token`.
    ///
    /// Returns false if nothing was pending under it.
    pub fn retract(&self, token: ExpiryToken) -> bool {
        matches!(
            self.apply_batch(UpdateBatch::retract(token)),
            Ok(Applied::Retracted { found: true, .. })
        )
    }

    /// Returns the durable sequence number.
    pub fn sequence(&self) -> Sequence {
        self.publisher.borrow().sequence
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.publisher.borrow().clone()
    }

    /// Returns the visible value at `path`.
    pub fn get(&self, path: &JsonPath) -> Option<Value> {
        self.publisher.borrow().get(path).cloned()
    }

    /// Returns true once a dump has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.tree.lock().is_loaded()
    }

    /// Returns the tokens of pending speculative patches, oldest first.
    pub fn pending_tokens(&self) -> Vec<ExpiryToken> {
        self.tree.lock().pending_tokens()
    }

    /// Returns true if `token` still has a pending patch.
    pub fn is_pending(&self, token: ExpiryToken) -> bool {
        self.tree.lock().is_pending(token)
    }

    /// Returns true if a skipped-ahead or unappliable durable batch was seen
    /// since the last dump.
    pub fn resync_required(&self) -> bool {
        self.resync_required.load(Ordering::SeqCst)
    }

    /// Subscribes to every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.publisher.subscribe()
    }

    /// Observes the value at `path`.
    ///
    /// The first emission is the current value; later emissions follow every
    /// applied change that alters it.
    pub fn watch(&self, path: JsonPath) -> PathWatch {
        PathWatch::new(self.subscribe(), path)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.publisher.receiver_count()
    }
}

impl Default for PatchLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PatchLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("PatchLog")
            .field("sequence", &snapshot.sequence)
            .field("pending", &snapshot.pending)
            .field("resync_required", &self.resync_required())
            .finish()
    }
}
