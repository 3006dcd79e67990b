//! Storage Error Types
//!
//! Bucket and entry operations fail with an [`Exn`](exn::Exn) carrying one of
//! the [`ErrorKind`] categories below, plus the location it was raised at.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, grouped by how a caller can react: bad input is never
/// worth retrying, I/O and backend failures might be.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File backing a bucket or entry does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The storage root or a bucket directory isn't accessible
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Bucket name is empty, contains separators or escapes the root
    #[display("invalid bucket name: {_0:?}")]
    InvalidName(#[error(not(source))] String),
    /// Entry key is empty or contains null bytes
    #[display("invalid entry key: {_0:?}")]
    InvalidKey(#[error(not(source))] String),
    /// Reading or writing an entry failed
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Failure reported by a non-filesystem backend
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidName("a/b".to_string()).to_string(), "invalid bucket name: \"a/b\"");
        assert_eq!(ErrorKind::Backend("boom".to_string()).to_string(), "backend error: boom");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Backend("boom".to_string()).is_retryable());
        assert!(!ErrorKind::InvalidKey(String::new()).is_retryable());
        assert!(!ErrorKind::PermissionDenied(PathBuf::from("/root")).is_retryable());
    }
}
