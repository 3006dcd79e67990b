//! Network fetch primitive.
//!
//! The [`Fetcher`] trait is the only way the rest of shellsync talks to the
//! network. It mirrors the browser's `fetch(url, options)`: a response is
//! returned for every completed exchange, whatever its status, and errors are
//! reserved for transport failures. [`fetch_ok()`](Fetcher::fetch_ok) adds the
//! stricter "must be a 2xx" rule used when populating caches.

pub mod error;
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mock")]
mod mock;
mod models;

#[cfg(feature = "http")]
pub use crate::http::HttpFetcher;
#[cfg(feature = "mock")]
pub use crate::mock::MockFetcher;
pub use crate::models::{CacheMode, FetchOptions, Response};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub type FetcherHandle = Arc<dyn Fetcher + Send + Sync>;

/// Content-addressable fetch primitive.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform a request, returning the response whatever its status.
    ///
    /// Only transport failures (DNS, connection, TLS, truncated body) are
    /// errors. Timeout policy belongs to the implementation.
    async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response>;

    /// Perform a request and require a successful (2xx) status.
    ///
    /// Returns [`Status`](ErrorKind::Status) for any other status, matching
    /// how a cache refuses to be populated with error pages.
    async fn fetch_ok(&self, url: &str, options: FetchOptions) -> Result<Response> {
        let response = self.fetch(url, options).await?;
        if !response.is_success() {
            exn::bail!(ErrorKind::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }
}
