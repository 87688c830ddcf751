//! Error types shared across the VSS data model.

use thiserror::Error;

/// Errors produced by the core data model.
///
/// The command processor shapes these into protocol error envelopes; the
/// variants therefore distinguish exactly the cases that map to different
/// response numbers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The VSS document violates the schema contract (fatal at startup).
    #[error("schema error: {0}")]
    Schema(String),

    /// A request path could not be parsed.
    #[error("malformed path: {0}")]
    MalformedPath(String),

    /// The path resolved to no node in the tree.
    #[error("no node found for {0}")]
    PathNotFound(String),

    /// The path names a node that cannot be used for this operation.
    #[error("path {0} is not valid for this request")]
    PathNotValid(String),

    /// A value was set directly on a branch node.
    #[error("path {0} points to a branch, needs to point to a signal")]
    NotALeaf(String),

    /// The supplied value does not match the declared datatype.
    #[error("{0}")]
    TypeMismatch(String),

    /// The supplied value is outside the declared range.
    #[error("{0}")]
    OutOfBounds(String),

    /// The channel lacks permission for this operation.
    #[error("{0}")]
    NoPermission(String),

    /// A subscribe path matched more than one signal.
    #[error("{0} matches more than one signal, subscribe works for one signal at a time")]
    NotSingleSignal(String),

    /// Unexpected failure inside a handler.
    #[error("{0}")]
    Generic(String),
}
