//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for encoding and decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// An operation path could not be resolved against the current tree shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Nothing exists at the path (or at its parent).
    #[error("path not found: {path}")]
    NotFound {
        /// JSON pointer of the missing location.
        path: String,
    },

    /// The parent exists but is a scalar.
    #[error("not a container: {path}")]
    NotAContainer {
        /// JSON pointer of the scalar parent.
        path: String,
    },

    /// Array index out of bounds or not an index.
    #[error("invalid array index {index} at {path}")]
    InvalidIndex {
        /// JSON pointer of the array.
        path: String,
        /// The offending segment.
        index: String,
    },

    /// The document root cannot be removed.
    #[error("cannot remove the document root")]
    RootRemoval,
}

/// Wire format errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON pointer string was malformed.
    #[error("invalid json pointer: {0:?}")]
    InvalidPointer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PathError::NotFound {
            path: "/apps/x".into(),
        };
        assert_eq!(err.to_string(), "path not found: /apps/x");

        let err = PathError::InvalidIndex {
            path: "/list".into(),
            index: "7".into(),
        };
        assert!(err.to_string().contains("7"));
        assert!(err.to_string().contains("/list"));
    }
}
