//! # patchsync client
//!
//! Keeps a local JSON state tree consistent with an authoritative host.
//!
//! This crate provides:
//! - The state tree and its single-writer patch log (sequence checks, atomic
//!   batches, speculative patches keyed by expiry token)
//! - Optimistic remote mutations with guaranteed rollback
//! - Path watchers that emit the current value and every change
//! - A sync engine (poll or push) with gap detection and dump resync
//! - HTTP transport abstraction
//! - Session events for expired authentication
//!
//! ## Architecture
//!
//! ```text
//! PatchSource ──▶ SyncEngine ──┐
//!                              ├─▶ PatchLog ──▶ PathWatch
//! RemoteMutator ◀─ MutationClient ┘
//! ```
//!
//! ## Key Invariants
//!
//! - The host is authoritative
//! - Durable batches apply only in strict sequence order
//! - A rejected batch leaves the tree unchanged
//! - Every speculative patch is resolved exactly once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod error;
mod http;
mod mutation;
mod session;
mod state;
mod store;
mod transport;
mod watch;

pub use applier::{Applied, PatchLog, Snapshot};
pub use config::{ClientConfig, RetryConfig};
pub use error::{RemoteError, SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer, STATUS_UNAUTHORIZED};
pub use mutation::{optimistic, MutationClient, RemoteMutator, RollbackGuard};
pub use session::{Session, SessionEvent};
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use store::StateTree;
pub use transport::{MockSource, PatchSource};
pub use watch::{PathWatch, TypedWatch};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
