//! # patchsync testkit
//!
//! Test utilities for patchsync.
//!
//! This crate provides:
//! - `ReferenceServer`, an in-memory authoritative host that serves dumps,
//!   revisions and mutations (directly or over loopback HTTP)
//! - Host-shaped fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use patchsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn start_package() {
//!     let server = Arc::new(sample_server());
//!     let log = Arc::new(PatchLog::from_dump(sample_dump()));
//!     let client = MutationClient::new(server, log, Session::default(), &test_config());
//!     // ... invoke mutations, watch paths
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
