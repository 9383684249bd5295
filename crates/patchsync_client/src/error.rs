//! Error types for the client.

use patchsync_protocol::{PathError, ProtocolError, RpcErrorBody, Sequence};
use thiserror::Error;

/// Result type for patch log and sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while applying or fetching state.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An operation path did not resolve. The batch was not applied.
    #[error("patch rejected: {0}")]
    Path(#[from] PathError),

    /// A durable batch does not continue the current sequence.
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap {
        /// The only sequence the log would accept.
        expected: Sequence,
        /// Sequence carried by the batch.
        found: Sequence,
    },

    /// The remote side failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(remote) => remote.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the session is no longer authenticated.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::AuthExpired(_)))
    }

    /// Returns true if the batch skipped ahead of the current sequence, which
    /// means updates were missed and a dump is needed.
    pub fn needs_resync(&self) -> bool {
        matches!(self, SyncError::SequenceGap { expected, found } if found > expected)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

/// Errors from a remote-mutating call or from the transport beneath it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The server answered with an error.
    #[error("remote call failed ({code}): {message}")]
    Rpc {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// The session is no longer authenticated.
    #[error("session expired: {0}")]
    AuthExpired(String),

    /// The request never produced an answer.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The answer could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The call did not resolve within the configured timeout.
    #[error("remote call timed out")]
    Timeout,

    /// The session was torn down.
    #[error("session closed")]
    SessionClosed,
}

impl RemoteError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { retryable, .. } => *retryable,
            RemoteError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if the session is no longer authenticated.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, RemoteError::AuthExpired(_))
    }
}

impl From<RpcErrorBody> for RemoteError {
    fn from(body: RpcErrorBody) -> Self {
        if body.is_authorization() {
            RemoteError::AuthExpired(body.message)
        } else {
            RemoteError::Rpc {
                code: body.code,
                message: body.message,
            }
        }
    }
}

impl From<ProtocolError> for RemoteError {
    fn from(err: ProtocolError) -> Self {
        RemoteError::Protocol(err.to_string())
    }
}
