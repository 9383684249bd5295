//! Transport layer abstraction for fetching authoritative state.

use crate::error::RemoteError;
use async_trait::async_trait;
use parking_lot::Mutex;
use patchsync_protocol::{Dump, Sequence, UpdateBatch};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Supplies the authoritative state as dumps and incremental revisions.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, mock for testing, etc.).
#[async_trait]
pub trait PatchSource: Send + Sync {
    /// Fetches a full snapshot.
    async fn dump(&self) -> Result<Dump, RemoteError>;

    /// Fetches durable revisions `from..=to` (or `from..` when `to` is
    /// `None`), in increasing sequence order.
    async fn updates(
        &self,
        from: Sequence,
        to: Option<Sequence>,
    ) -> Result<Vec<UpdateBatch>, RemoteError>;
}

#[async_trait]
impl<T: PatchSource + ?Sized> PatchSource for Arc<T> {
    async fn dump(&self) -> Result<Dump, RemoteError> {
        (**self).dump().await
    }

    async fn updates(
        &self,
        from: Sequence,
        to: Option<Sequence>,
    ) -> Result<Vec<UpdateBatch>, RemoteError> {
        (**self).updates(from, to).await
    }
}

/// A scripted source for testing.
///
/// `dump()` returns the configured dump. `updates()` pops the next scripted
/// response, or returns no revisions once the script is exhausted. A queued
/// failure is returned by the next call of either kind.
#[derive(Debug, Default)]
pub struct MockSource {
    connected: AtomicBool,
    dump: Mutex<Option<Dump>>,
    updates: Mutex<VecDeque<Vec<UpdateBatch>>>,
    failures: Mutex<VecDeque<RemoteError>>,
    requests: Mutex<Vec<(Sequence, Option<Sequence>)>>,
    dump_calls: AtomicUsize,
}

impl MockSource {
    /// Creates a connected source with nothing scripted.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Sets the dump.
    pub fn set_dump(&self, dump: Dump) {
        *self.dump.lock() = Some(dump);
    }

    /// Queues the response to a future `updates()` call.
    pub fn push_updates(&self, batches: Vec<UpdateBatch>) {
        self.updates.lock().push_back(batches);
    }

    /// Queues a failure for the next call.
    pub fn push_failure(&self, error: RemoteError) {
        self.failures.lock().push_back(error);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns true if the source is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns how many times `dump()` was called.
    pub fn dump_calls(&self) -> usize {
        self.dump_calls.load(Ordering::SeqCst)
    }

    /// Returns the `(from, to)` ranges requested so far.
    pub fn requests(&self) -> Vec<(Sequence, Option<Sequence>)> {
        self.requests.lock().clone()
    }

    fn check(&self) -> Result<(), RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::transport_retryable("not connected"));
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PatchSource for MockSource {
    async fn dump(&self) -> Result<Dump, RemoteError> {
        self.dump_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.dump
            .lock()
            .clone()
            .ok_or_else(|| RemoteError::Protocol("no mock dump set".into()))
    }

    async fn updates(
        &self,
        from: Sequence,
        to: Option<Sequence>,
    ) -> Result<Vec<UpdateBatch>, RemoteError> {
        self.requests.lock().push((from, to));
        self.check()?;
        Ok(self.updates.lock().pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_source_connection() {
        let source = MockSource::new();
        assert!(source.is_connected());

        source.set_connected(false);
        let result = source.updates(1, None).await;
        assert!(matches!(result, Err(RemoteError::Transport { retryable: true, .. })));
    }

    #[tokio::test]
    async fn mock_source_script() {
        let source = MockSource::new();
        source.set_dump(Dump::new(json!({}), 3));
        source.push_updates(vec![UpdateBatch::durable(4, vec![])]);

        assert_eq!(source.dump().await.unwrap().sequence, 3);
        assert_eq!(source.updates(4, Some(10)).await.unwrap().len(), 1);
        assert!(source.updates(5, None).await.unwrap().is_empty());
        assert_eq!(source.requests(), vec![(4, Some(10)), (5, None)]);
        assert_eq!(source.dump_calls(), 1);
    }

    #[tokio::test]
    async fn mock_source_failures_are_one_shot() {
        let source = MockSource::new();
        source.set_dump(Dump::new(json!({}), 1));
        source.push_failure(RemoteError::AuthExpired("expired".into()));

        assert!(matches!(source.dump().await, Err(RemoteError::AuthExpired(_))));
        assert!(source.dump().await.is_ok());
    }

    #[tokio::test]
    async fn missing_dump_is_an_error() {
        let source = MockSource::new();
        assert!(matches!(source.dump().await, Err(RemoteError::Protocol(_))));
    }
}
