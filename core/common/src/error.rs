//! Common error types for artifact storage.

use std::fmt;
use std::io;

use thiserror::Error;

/// Top-level error type for storage operations.
///
/// Every backend maps its native failures onto these variants so callers
/// see the same taxonomy regardless of where the bytes live.
#[derive(Debug, Error)]
pub enum Error {
    /// Path is malformed or would escape the configured root.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Object absent where existence was required.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Recursive flag misuse or an operation that does not apply to the target.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Authentication or authorization failure.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Network or backend hiccup, eligible for retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// A multi-file transfer stopped at its first failure.
    #[error("Transfer failed at {item} ({unattempted} item(s) not attempted): {cause}")]
    Transfer {
        /// The work item that failed first.
        item: String,
        /// The underlying failure.
        #[source]
        cause: Box<Error>,
        /// Number of items that were never scheduled.
        unattempted: usize,
    },

    /// Backend lacks the requested capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Settings are incomplete or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend failure that fits no other category.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Map an I/O error observed while touching `target`.
    ///
    /// Missing files and permission failures get their own variants so
    /// callers can tell them apart from generic I/O trouble. A path that
    /// runs through a regular file does not exist.
    pub fn from_io(err: io::Error, target: impl fmt::Display) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
                Error::NotFound(target.to_string())
            }
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("{}: {}", target, err))
            }
            _ => Error::Io(err),
        }
    }

    /// Whether the failure may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_kinds() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(Error::from_io(missing, "a/b").is_not_found());

        let through_file = io::Error::new(io::ErrorKind::NotADirectory, "not a dir");
        assert!(Error::from_io(through_file, "cats.jpg/x").is_not_found());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            Error::from_io(denied, "a/b"),
            Error::PermissionDenied(_)
        ));

        let other = io::Error::other("disk on fire");
        assert!(matches!(Error::from_io(other, "a/b"), Error::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("503".to_string()).is_transient());
        assert!(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).is_transient());
        assert!(!Error::NotFound("x".to_string()).is_transient());
        assert!(!Error::PermissionDenied("x".to_string()).is_transient());
    }

    #[test]
    fn test_transfer_error_keeps_cause() {
        let err = Error::Transfer {
            item: "a.txt -> models/a.txt".to_string(),
            cause: Box::new(Error::PermissionDenied("bucket".to_string())),
            unattempted: 4,
        };

        let message = err.to_string();
        assert!(message.contains("a.txt -> models/a.txt"));
        assert!(message.contains("4 item(s)"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
