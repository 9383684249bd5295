//! Protocol messages for the transport and mutation boundaries.

use crate::error::ProtocolResult;
use crate::operation::Operation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Revision number of the authoritative tree.
pub type Sequence = u64;

/// RPC error code the host uses for "session is not authenticated".
pub const AUTHORIZATION_CODE: i32 = 34;

/// Correlates a speculative batch with the batch that later resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpiryToken(Uuid);

impl ExpiryToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExpiryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a batch means to the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BatchKind {
    /// A server-confirmed revision. Must continue the current sequence.
    Durable {
        /// Revision number of this batch.
        sequence: Sequence,
        /// Speculative batch this revision supersedes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires: Option<ExpiryToken>,
    },
    /// A local, unconfirmed change. Never advances the sequence.
    Speculative {
        /// Token under which the change is recorded.
        token: ExpiryToken,
    },
    /// Resolves a speculative batch without any new operations.
    Retract {
        /// Token of the speculative batch to roll back.
        token: ExpiryToken,
    },
}

/// An ordered list of operations plus its sequencing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Operations, applied in order.
    pub operations: Vec<Operation>,
    /// Sequencing metadata.
    #[serde(flatten)]
    pub kind: BatchKind,
}

impl UpdateBatch {
    /// Creates a durable revision.
    pub fn durable(sequence: Sequence, operations: Vec<Operation>) -> Self {
        Self {
            operations,
            kind: BatchKind::Durable {
                sequence,
                expires: None,
            },
        }
    }

    /// Creates a speculative batch under a token.
    pub fn speculative(token: ExpiryToken, operations: Vec<Operation>) -> Self {
        Self {
            operations,
            kind: BatchKind::Speculative { token },
        }
    }

    /// Creates an empty batch that rolls back a speculative batch.
    pub fn retract(token: ExpiryToken) -> Self {
        Self {
            operations: Vec::new(),
            kind: BatchKind::Retract { token },
        }
    }

    /// Tags a durable batch as superseding `token`. Other kinds are unchanged.
    pub fn with_expiry(mut self, token: ExpiryToken) -> Self {
        if let BatchKind::Durable { expires, .. } = &mut self.kind {
            *expires = Some(token);
        }
        self
    }

    /// Returns the revision number of a durable batch.
    pub fn sequence(&self) -> Option<Sequence> {
        match self.kind {
            BatchKind::Durable { sequence, .. } => Some(sequence),
            _ => None,
        }
    }

    /// Returns the token this batch resolves, if any.
    pub fn resolves(&self) -> Option<ExpiryToken> {
        match self.kind {
            BatchKind::Durable { expires, .. } => expires,
            BatchKind::Retract { token } => Some(token),
            BatchKind::Speculative { .. } => None,
        }
    }

    /// Returns true for speculative batches.
    pub fn is_speculative(&self) -> bool {
        matches!(self.kind, BatchKind::Speculative { .. })
    }

    /// Returns true if the batch carries no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A full authoritative snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dump {
    /// The whole tree.
    #[serde(rename = "value")]
    pub tree: Value,
    /// Revision number of the snapshot.
    #[serde(rename = "id")]
    pub sequence: Sequence,
}

impl Dump {
    /// Creates a new dump.
    pub fn new(tree: Value, sequence: Sequence) -> Self {
        Self { tree, sequence }
    }
}

/// Anything a push transport can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Update {
    /// An incremental batch.
    Batch(UpdateBatch),
    /// A full replacement snapshot.
    Dump(Dump),
}

/// Asks for the durable revisions `from..=to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatesRequest {
    /// First revision wanted.
    pub from: Sequence,
    /// Inclusive upper bound; `None` means everything available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Sequence>,
}

impl UpdatesRequest {
    /// Creates a request.
    pub fn new(from: Sequence, to: Option<Sequence>) -> Self {
        Self { from, to }
    }
}

/// A remote-mutating call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MutationRequest {
    /// RPC method name, e.g. `package.start`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
    /// Token of the speculative batch applied for this call, so the server
    /// can tag its revision with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_id: Option<ExpiryToken>,
}

impl MutationRequest {
    /// Creates a request with no speculative token.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            expire_id: None,
        }
    }

    /// Sets the speculative token.
    pub fn with_expire_id(mut self, token: Option<ExpiryToken>) -> Self {
        self.expire_id = token;
        self
    }
}

/// Result of a remote-mutating call. No patch means no state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Method result.
    #[serde(rename = "response")]
    pub result: Value,
    /// Revision produced by the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<UpdateBatch>,
}

impl MutationResponse {
    /// Creates a response without a patch.
    pub fn new(result: Value) -> Self {
        Self {
            result,
            patch: None,
        }
    }

    /// Attaches a patch.
    pub fn with_patch(mut self, patch: UpdateBatch) -> Self {
        self.patch = Some(patch);
        self
    }
}

/// Error body returned by the RPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorBody {
    /// Creates an error body.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Returns true if the session is no longer authenticated.
    pub fn is_authorization(&self) -> bool {
        self.code == AUTHORIZATION_CODE
    }
}

/// Encodes a message to JSON bytes.
pub fn encode_json<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message from JSON bytes.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}
