//! Sync engine state machine.
//!
//! The engine feeds a [`PatchLog`] from a [`PatchSource`]: a dump to start
//! from, then revisions from `sequence + 1` onward. Whenever the log reports
//! that revisions were skipped (or one could not be applied) the engine loads
//! a fresh dump instead.

use crate::applier::{Applied, PatchLog};
use crate::config::ClientConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::session::Session;
use crate::transport::PatchSource;
use parking_lot::RwLock;
use patchsync_protocol::{Sequence, Update};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is fetching the initial dump.
    Loading,
    /// Engine is fetching and applying revisions.
    Syncing,
    /// Engine is replacing the tree after a gap.
    Resyncing,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Loading | SyncState::Syncing | SyncState::Resyncing
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of revisions applied.
    pub batches_applied: u64,
    /// Total number of operations inside applied revisions.
    pub operations_applied: u64,
    /// Total number of dumps loaded, including the first one.
    pub dumps_loaded: u64,
    /// Number of dumps loaded to recover from a gap.
    pub resyncs: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Number of revisions applied.
    pub applied: u64,
    /// Number of stale revisions skipped.
    pub skipped: u64,
    /// Whether a dump replaced the tree during the cycle.
    pub resynced: bool,
    /// Sequence after the cycle.
    pub sequence: Sequence,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    fn empty() -> Self {
        Self {
            applied: 0,
            skipped: 0,
            resynced: false,
            sequence: 0,
            duration: Duration::ZERO,
        }
    }
}

/// The sync engine keeps a patch log in step with a remote source.
pub struct SyncEngine<S: PatchSource> {
    config: ClientConfig,
    source: S,
    log: Arc<PatchLog>,
    session: Session,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<S: PatchSource> SyncEngine<S> {
    /// Creates a new sync engine.
    pub fn new(config: ClientConfig, source: S, log: Arc<PatchLog>, session: Session) -> Self {
        Self {
            config,
            source,
            log,
            session,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the patch log being fed.
    pub fn log(&self) -> &Arc<PatchLog> {
        &self.log
    }

    /// Returns the source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn ensure_can_start(&self, to: &str) -> SyncResult<()> {
        let current = self.state();
        if current.can_start_sync() {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: format!("{current:?}"),
                to: to.into(),
            })
        }
    }

    /// Loads the initial dump.
    pub async fn bootstrap(&self) -> SyncResult<Sequence> {
        self.ensure_can_start("bootstrap")?;
        self.set_state(SyncState::Loading);
        match self.load_dump().await {
            Ok(sequence) => {
                self.set_state(SyncState::Synced);
                Ok(sequence)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    async fn load_dump(&self) -> SyncResult<Sequence> {
        let dump = self.source.dump().await?;
        let sequence = dump.sequence;
        self.log.load_dump(dump);
        self.stats.write().dumps_loaded += 1;
        Ok(sequence)
    }

    async fn resync(&self) -> SyncResult<Sequence> {
        self.set_state(SyncState::Resyncing);
        info!(sequence = self.log.sequence(), "resyncing from dump");
        let sequence = self.load_dump().await?;
        self.stats.write().resyncs += 1;
        Ok(sequence)
    }

    /// Performs one sync cycle: fetch every available revision and apply it.
    ///
    /// Loads a dump first if the log was never loaded or is flagged for
    /// resync. A forward gap or an unappliable revision mid-cycle also ends
    /// in a dump.
    pub async fn sync_once(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.reset_cancel();
        self.ensure_can_start("sync")?;

        let mut result = SyncCycleResult::empty();
        match self.sync_cycle(&mut result).await {
            Ok(()) => {
                result.sequence = self.log.sequence();
                result.duration = start.elapsed();
                self.set_state(SyncState::Synced);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }

                debug!(
                    applied = result.applied,
                    resynced = result.resynced,
                    sequence = result.sequence,
                    "sync cycle complete"
                );
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    async fn sync_cycle(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        if !self.log.is_loaded() {
            self.set_state(SyncState::Loading);
            self.load_dump().await?;
            result.resynced = true;
        } else if self.log.resync_required() {
            self.resync().await?;
            result.resynced = true;
        }

        self.set_state(SyncState::Syncing);
        let limit = self.config.fetch_limit.max(1);

        loop {
            self.check_cancelled()?;

            let from = self.log.sequence() + 1;
            let to = from.saturating_add(limit - 1);
            let batches = self.source.updates(from, Some(to)).await?;
            let fetched = batches.len() as u64;

            for batch in batches {
                let operations = batch.operations.len() as u64;
                match self.log.apply_batch(batch) {
                    Ok(Applied::Committed { .. }) => {
                        result.applied += 1;
                        let mut stats = self.stats.write();
                        stats.batches_applied += 1;
                        stats.operations_applied += operations;
                    }
                    Ok(_) => {}
                    Err(SyncError::SequenceGap { expected, found }) if found < expected => {
                        debug!(found, "skipping stale revision");
                        result.skipped += 1;
                    }
                    Err(SyncError::SequenceGap { .. }) | Err(SyncError::Path(_)) => {
                        self.resync().await?;
                        result.resynced = true;
                        self.set_state(SyncState::Syncing);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            if fetched < limit {
                return Ok(());
            }
        }
    }

    /// Performs a sync with retry on transient errors.
    pub async fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = self.config.retry_delay(attempt);
                tokio::time::sleep(delay).await;

                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;

            match self.sync_once().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        debug!(attempt, error = %e, "sync failed, retrying");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    /// Polls the source every `poll_interval` until `shutdown` turns true,
    /// its sender is dropped, the session closes or the engine is cancelled.
    ///
    /// Failed cycles are logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SyncResult<()> {
        info!(interval = ?self.config.poll_interval, "sync loop started");
        loop {
            if *shutdown.borrow() || self.session.is_closed() {
                break;
            }
            match self.sync_with_retry().await {
                Ok(_) => {}
                Err(SyncError::Cancelled) => break,
                Err(e) => warn!(error = %e, "sync cycle failed"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        self.set_state(SyncState::Idle);
        info!("sync loop stopped");
        Ok(())
    }

    /// Applies updates pushed by the host until the channel closes or
    /// `shutdown` fires.
    ///
    /// Loads a dump first if the log is empty. A batch that cannot be applied
    /// in order is answered with a dump from the source.
    pub async fn run_push(
        &self,
        mut updates: mpsc::Receiver<Update>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SyncResult<()> {
        if !self.log.is_loaded() {
            self.bootstrap().await?;
        }
        self.set_state(SyncState::Syncing);
        info!("push sync started");

        loop {
            let update = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            match self.log.apply_update(update) {
                Ok(Applied::Committed { .. }) => {
                    self.stats.write().batches_applied += 1;
                }
                Ok(Applied::Loaded { .. }) => {
                    self.stats.write().dumps_loaded += 1;
                }
                Ok(_) => {}
                Err(SyncError::SequenceGap { expected, found }) if found < expected => {
                    debug!(found, "skipping stale pushed revision");
                }
                Err(SyncError::SequenceGap { .. }) | Err(SyncError::Path(_)) => {
                    if let Err(e) = self.resync().await {
                        self.handle_error(&e);
                        return Err(e);
                    }
                    self.set_state(SyncState::Syncing);
                }
                Err(e) => {
                    self.handle_error(&e);
                    return Err(e);
                }
            }
        }

        self.set_state(SyncState::Idle);
        info!("push sync stopped");
        Ok(())
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
        warn!(error = %error, "sync failed");
        if let SyncError::Remote(RemoteError::AuthExpired(reason)) = error {
            self.session.notify_unauthorized(reason.clone());
        }
    }
}

impl<S: PatchSource> std::fmt::Debug for SyncEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("log", &self.log)
            .finish()
    }
}
