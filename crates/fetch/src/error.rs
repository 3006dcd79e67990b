//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The URL could not be parsed or used to build a request.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Connection, DNS, TLS or timeout failure.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The exchange completed but the server did not answer with a 2xx.
    #[display("unexpected status {status} for {url}")]
    Status {
        url: String,
        status: u16,
    },
    /// The response body could not be read to completion.
    #[display("failed to read response body: {_0}")]
    Body(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Body(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidUrl(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn error_kind_display() {
        let kind = ErrorKind::Status {
            url: "https://example.com/a.js".to_string(),
            status: 404,
        };
        assert_eq!(kind.to_string(), "unexpected status 404 for https://example.com/a.js");
    }

    #[rstest]
    #[case(ErrorKind::Network("reset".to_string()), true)]
    #[case(ErrorKind::Body("eof".to_string()), true)]
    #[case(ErrorKind::InvalidUrl("nope".to_string()), false)]
    #[case(ErrorKind::Status { url: String::new(), status: 404 }, false)]
    #[case(ErrorKind::Status { url: String::new(), status: 503 }, true)]
    #[case(ErrorKind::Status { url: String::new(), status: 429 }, true)]
    fn error_kind_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
