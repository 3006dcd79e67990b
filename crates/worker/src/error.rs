//! Worker Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures of the injected
//! collaborators are raised as [`ErrorKind::Fetch`] or
//! [`ErrorKind::Storage`] with the collaborator's own error kept as a child
//! frame.

use crate::worker::WorkerState;
use derive_more::{Display, Error};

/// A worker error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a failure.
///
/// ### Dependency Errors
/// - [`ErrorKind::Fetch`]
/// - [`ErrorKind::Storage`]
///
/// ### Input Errors
/// - [`ErrorKind::InvalidKey`], [`ErrorKind::InvalidFingerprint`],
///   [`ErrorKind::InvalidOrigin`], [`ErrorKind::InvalidManifest`],
///   [`ErrorKind::Deployment`], [`ErrorKind::UnknownCommand`]
///
/// ### Operational Errors
/// - [`ErrorKind::InvalidState`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A network fetch failed or returned an unusable status.
    #[display("fetch failed")]
    Fetch,
    /// A cache bucket operation failed.
    #[display("cache storage operation failed")]
    Storage,
    #[display("invalid resource key: {_0:?}")]
    InvalidKey(#[error(not(source))] String),
    #[display("invalid fingerprint: {_0:?}")]
    InvalidFingerprint(#[error(not(source))] String),
    #[display("invalid origin: {_0:?}")]
    InvalidOrigin(#[error(not(source))] String),
    /// The manifest could not be parsed or contains conflicting keys.
    #[display("invalid resource manifest: {_0}")]
    InvalidManifest(#[error(not(source))] String),
    /// The deployment descriptor could not be read or is inconsistent.
    #[display("invalid deployment: {_0}")]
    Deployment(#[error(not(source))] String),
    /// A lifecycle operation was attempted out of order.
    #[display("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: WorkerState,
    },
    #[display("unknown command: {_0:?}")]
    UnknownCommand(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch | Self::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        let kind = ErrorKind::InvalidState {
            operation: "activate",
            state: WorkerState::Uninitialized,
        };
        assert_eq!(kind.to_string(), "cannot activate while uninitialized");
        assert_eq!(ErrorKind::InvalidKey("a#b".to_string()).to_string(), "invalid resource key: \"a#b\"");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Fetch.is_retryable());
        assert!(ErrorKind::Storage.is_retryable());
        assert!(!ErrorKind::InvalidManifest("dup".to_string()).is_retryable());
    }
}
