//! Error types shared by every graph operation.
//!
//! Each operation returns a definite success or exactly one [`NgError`]
//! kind. There is no partial-success channel: construction-style
//! operations unwind whatever they built before reporting the error.

use serde::{Deserialize, Serialize};

/// Result alias used throughout the crate.
pub type Result<T, E = NgError> = core::result::Result<T, E>;

/// Error kinds reported by graph operations.
///
/// The enum is `Copy` and serializable so an error can be carried back
/// to a caller inside a response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum NgError {
    /// Malformed request, bad name, or wrong kind of payload.
    #[error("invalid argument")]
    InvalidArgument,

    /// The named type, node, hook or path segment does not exist.
    #[error("not found")]
    NotFound,

    /// The name is already taken.
    #[error("already exists")]
    AlreadyExists,

    /// A resource is in use or temporarily exhausted. Retryable.
    #[error("resource busy")]
    Busy,

    /// The target became invalid while the operation was in flight.
    #[error("target unreachable")]
    Unreachable,

    /// An allocation or spawn failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation is not permitted on this target.
    #[error("permission denied")]
    PermissionDenied,

    /// No handler or codec exists for the request.
    #[error("operation not supported")]
    Unsupported,

    /// A node type was built against a different ABI version.
    #[error("ABI version mismatch")]
    VersionMismatch,

    /// The destination node is already invalid (shutting down).
    #[error("target node is invalid")]
    Invalid,

    /// A data item was dropped because its hook or node was invalid.
    #[error("I/O error")]
    Io,
}

impl NgError {
    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}
