//! Process-wide session events.
//!
//! Any component that observes an expired session reports it here, and every
//! subscriber hears about it once. The session is an explicit value handed to
//! each component that needs it; nothing here is global.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The host no longer accepts the session's credentials.
    Unauthorized {
        /// What the host said.
        reason: String,
    },
    /// The session was torn down locally.
    Closed,
}

#[derive(Debug)]
struct SessionInner {
    events: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    unauthorized: AtomicBool,
    closed: AtomicBool,
}

/// Shared handle to session state and its event channel.
///
/// Clones share the same channel.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session whose channel buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(SessionInner {
                events: Mutex::new(Some(sender)),
                unauthorized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to session events.
    ///
    /// A receiver taken after [`close`](Self::close) yields no events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        match self.inner.events.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (_, receiver) = broadcast::channel(1);
                receiver
            }
        }
    }

    /// Reports that the session expired.
    ///
    /// Only the first report after authentication is broadcast; returns true
    /// if this call broadcast it.
    pub fn notify_unauthorized(&self, reason: impl Into<String>) -> bool {
        if self.is_closed() || self.inner.unauthorized.swap(true, Ordering::SeqCst) {
            return false;
        }
        let reason = reason.into();
        warn!(%reason, "session unauthorized");
        self.send(SessionEvent::Unauthorized { reason });
        true
    }

    /// Records a successful (re)authentication.
    pub fn mark_authenticated(&self) {
        self.inner.unauthorized.store(false, Ordering::SeqCst);
    }

    /// Returns true if the session is currently considered expired.
    pub fn is_unauthorized(&self) -> bool {
        self.inner.unauthorized.load(Ordering::SeqCst)
    }

    /// Tears the session down. Subscribers receive [`SessionEvent::Closed`]
    /// and then see the channel end.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("session closed");
        let sender = self.inner.events.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(SessionEvent::Closed);
        }
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn send(&self, event: SessionEvent) {
        if let Some(sender) = self.inner.events.lock().as_ref() {
            // No subscribers is fine.
            let _ = sender.send(event);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(16)
    }
}
