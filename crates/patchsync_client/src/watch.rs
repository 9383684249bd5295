//! Reactive observation of a path in the tree.
//!
//! ```rust,ignore
//! let mut status = log.watch(JsonPath::new(["package-data", "bitcoind", "status"]));
//!
//! // First emission is the current value.
//! let current = status.next().await;
//!
//! // Later emissions arrive whenever an applied change alters the value.
//! while let Some(value) = status.next().await {
//!     println!("status is now {value:?}");
//! }
//! ```
//!
//! Watchers see the latest published snapshot. If several changes land
//! between two polls only the newest value is emitted, and an emission equal
//! to the previous one is skipped. Dropping a watcher unsubscribes it.

use crate::applier::Snapshot;
use crate::error::{SyncError, SyncResult};
use futures::stream::{self, Stream};
use patchsync_protocol::JsonPath;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use tokio::sync::watch;

/// Watches the value at one path. `None` means the path is absent.
#[derive(Debug)]
pub struct PathWatch {
    receiver: watch::Receiver<Snapshot>,
    path: JsonPath,
    last: Option<Option<Value>>,
}

impl PathWatch {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>, path: JsonPath) -> Self {
        Self {
            receiver,
            path,
            last: None,
        }
    }

    /// Returns the watched path.
    pub fn path(&self) -> &JsonPath {
        &self.path
    }

    /// Returns the value in the latest snapshot without waiting.
    pub fn current(&self) -> Option<Value> {
        self.receiver.borrow().get(&self.path).cloned()
    }

    /// Waits for the next emission.
    ///
    /// The first call returns immediately with the current value. Returns
    /// `None` once the patch log is gone.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        if self.last.is_none() {
            let value = self.receiver.borrow_and_update().get(&self.path).cloned();
            self.last = Some(value.clone());
            return Some(value);
        }

        loop {
            if self.receiver.changed().await.is_err() {
                return None;
            }
            let value = self.receiver.borrow_and_update().get(&self.path).cloned();
            if self.last.as_ref() != Some(&value) {
                self.last = Some(value.clone());
                return Some(value);
            }
        }
    }

    /// Deserializes each emission into `T`.
    pub fn typed<T: DeserializeOwned>(self) -> TypedWatch<T> {
        TypedWatch {
            inner: self,
            _marker: PhantomData,
        }
    }

    /// Converts the watcher into a stream of emissions.
    pub fn into_stream(self) -> impl Stream<Item = Option<Value>> {
        stream::unfold(self, |mut watch| async move {
            let value = watch.next().await?;
            Some((value, watch))
        })
    }
}

/// A [`PathWatch`] whose emissions are deserialized.
#[derive(Debug)]
pub struct TypedWatch<T> {
    inner: PathWatch,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedWatch<T> {
    /// Returns the watched path.
    pub fn path(&self) -> &JsonPath {
        self.inner.path()
    }

    /// Waits for the next emission and deserializes it.
    ///
    /// A value of the wrong shape yields [`SyncError::Protocol`]; the watcher
    /// stays usable.
    pub async fn next(&mut self) -> Option<SyncResult<Option<T>>> {
        let value = self.inner.next().await?;
        Some(match value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| SyncError::Protocol(format!("unexpected value shape: {e}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::applier::PatchLog;
    use futures::StreamExt;
    use patchsync_protocol::{Dump, JsonPath, Operation, UpdateBatch};
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    fn log() -> PatchLog {
        PatchLog::from_dump(Dump::new(
            json!({"status": "stopped", "config": {"name": "node"}}),
            5,
        ))
    }

    fn status() -> JsonPath {
        JsonPath::new(["status"])
    }

    #[tokio::test]
    async fn emits_current_value_first() {
        let log = log();
        let mut watch = log.watch(status());
        assert_eq!(watch.next().await, Some(Some(json!("stopped"))));
    }

    #[tokio::test]
    async fn emits_after_change() {
        let log = log();
        let mut watch = log.watch(status());
        watch.next().await;

        log.apply_batch(UpdateBatch::durable(6, vec![Operation::replace(status(), "running")]))
            .unwrap();
        assert_eq!(watch.next().await, Some(Some(json!("running"))));
    }

    #[tokio::test]
    async fn unrelated_changes_are_not_emitted() {
        let log = log();
        let mut watch = log.watch(status());
        watch.next().await;

        log.apply_batch(UpdateBatch::durable(
            6,
            vec![Operation::replace(JsonPath::new(["config", "name"]), "renamed")],
        ))
        .unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), watch.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn absent_path_emits_none() {
        let log = log();
        let path = JsonPath::new(["config", "port"]);
        let mut watch = log.watch(path.clone());
        assert_eq!(watch.next().await, Some(None));

        log.apply_batch(UpdateBatch::durable(6, vec![Operation::add(path, 8332)]))
            .unwrap();
        assert_eq!(watch.next().await, Some(Some(json!(8332))));
    }

    #[tokio::test]
    async fn ends_when_log_dropped() {
        let log = log();
        let mut watch = log.watch(status());
        watch.next().await;
        drop(log);
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn dropping_watch_unsubscribes() {
        let log = log();
        let watch = log.watch(status());
        assert_eq!(log.subscriber_count(), 1);
        drop(watch);
        assert_eq!(log.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn typed_emissions() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Config {
            name: String,
        }

        let log = log();
        let mut config = log.watch(JsonPath::new(["config"])).typed::<Config>();
        let first = config.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            Some(Config {
                name: "node".into()
            })
        );

        log.apply_batch(UpdateBatch::durable(
            6,
            vec![Operation::replace(JsonPath::new(["config"]), json!(42))],
        ))
        .unwrap();
        assert!(config.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn stream_adapter() {
        let log = log();
        let stream = log.watch(status()).into_stream();
        futures::pin_mut!(stream);
        assert_eq!(stream.next().await, Some(Some(json!("stopped"))));

        log.apply_batch(UpdateBatch::durable(6, vec![Operation::replace(status(), "running")]))
            .unwrap();
        assert_eq!(stream.next().await, Some(Some(json!("running"))));
    }
}
