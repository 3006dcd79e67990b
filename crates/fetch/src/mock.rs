//! In-memory fetcher for testing.

use crate::error::{ErrorKind, Result};
use crate::{FetchOptions, Fetcher, Response};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    routes: HashMap<String, (u16, Bytes)>,
    failing: HashSet<String>,
    requests: Vec<(String, FetchOptions)>,
}

/// In-memory fetcher for testing.
///
/// Answers routed URLs with their configured status and body, everything
/// else with a `404`, and records every request it sees (including the
/// [`FetchOptions`] it was given) for later assertions.
///
/// # Examples
///
/// ```
/// use shellsync_fetch::{FetchOptions, Fetcher, MockFetcher};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = MockFetcher::with_routes([("https://example.com/", "<html>")]);
/// let response = fetcher.fetch("https://example.com/", FetchOptions::reload()).await?;
/// assert_eq!(response.status, 200);
/// assert_eq!(fetcher.requests().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockFetcher {
    state: Mutex<State>,
}

impl MockFetcher {
    /// Create a mock fetcher answering each URL with `200` and the given body.
    pub fn with_routes(routes: impl IntoIterator<Item = (impl Into<String>, impl Into<Bytes>)>) -> Self {
        let fetcher = Self::default();
        for (url, body) in routes {
            fetcher.route(url, body);
        }
        fetcher
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread shouldn't take every other assertion down with it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer `url` with `200` and `body`.
    pub fn route(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.route_status(url, 200, body);
    }

    /// Answer `url` with an arbitrary status and body.
    pub fn route_status(&self, url: impl Into<String>, status: u16, body: impl Into<Bytes>) {
        self.state().routes.insert(url.into(), (status, body.into()));
    }

    /// Make requests for `url` fail with a network error.
    pub fn fail(&self, url: impl Into<String>) {
        self.state().failing.insert(url.into());
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<(String, FetchOptions)> {
        self.state().requests.clone()
    }

    /// Number of requests seen for `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.state().requests.iter().filter(|(u, _)| u == url).count()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response> {
        let mut state = self.state();
        state.requests.push((url.to_string(), options));
        if state.failing.contains(url) {
            exn::bail!(ErrorKind::Network(format!("injected failure for {url}")));
        }
        Ok(match state.routes.get(url) {
            Some((status, body)) => Response::new(url, *status, body.clone()),
            None => Response::new(url, 404, Bytes::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheMode;

    #[tokio::test]
    async fn test_routes_and_recording() {
        let fetcher = MockFetcher::with_routes([("https://example.com/a.js", "a")]);
        let response = fetcher.fetch("https://example.com/a.js", FetchOptions::reload()).await.unwrap();
        assert_eq!(response.body, Bytes::from_static(b"a"));
        let missing = fetcher.fetch("https://example.com/b.js", FetchOptions::default()).await.unwrap();
        assert_eq!(missing.status, 404);
        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1.cache, CacheMode::Reload);
        assert_eq!(requests[1].1.cache, CacheMode::Default);
    }

    #[tokio::test]
    async fn test_fetch_ok_rejects_error_statuses() {
        let fetcher = MockFetcher::default();
        fetcher.route_status("https://example.com/gone", 410, "gone");
        let err = fetcher.fetch_ok("https://example.com/gone", FetchOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Status { status: 410, .. }));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let fetcher = MockFetcher::with_routes([("https://example.com/", "index")]);
        fetcher.fail("https://example.com/");
        let err = fetcher.fetch("https://example.com/", FetchOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)));
        assert_eq!(fetcher.request_count("https://example.com/"), 1);
    }
}
