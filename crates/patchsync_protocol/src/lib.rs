//! # patchsync protocol
//!
//! Data types shared by every participant of the patch-synchronization
//! protocol.
//!
//! This crate provides:
//! - `JsonPath` addressing (RFC 6901 pointers on the wire)
//! - `Operation` (replace / add / remove) and the tree primitives that apply them
//! - `UpdateBatch`, `Dump` and `Update` for the transport boundary
//! - `MutationRequest` / `MutationResponse` for the mutation boundary
//! - JSON encoding helpers
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod path;

pub use error::{PathError, ProtocolError, ProtocolResult};
pub use messages::{
    decode_json, encode_json, BatchKind, Dump, ExpiryToken, MutationRequest, MutationResponse,
    RpcErrorBody, Sequence, Update, UpdateBatch, UpdatesRequest, AUTHORIZATION_CODE,
};
pub use operation::{apply_operation, apply_operations, get, OpKind, Operation};
pub use path::{JsonPath, PathSegment};
