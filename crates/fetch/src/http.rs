//! HTTP fetcher backed by [`reqwest`].

use crate::error::{ErrorKind, Result};
use crate::{CacheMode, FetchOptions, Fetcher, Response};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use std::time::Duration;

const USER_AGENT: &str = concat!("shellsync/", env!("CARGO_PKG_VERSION"));

/// Fetches over HTTP(S) with a shared connection pool.
///
/// [`CacheMode::Reload`] is translated into the same request headers a
/// browser sends on a hard reload, so that proxies and CDNs revalidate with
/// the origin instead of answering from their own caches.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}
impl HttpFetcher {
    /// Create a fetcher with an optional per-request timeout.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().or_raise(|| ErrorKind::Network("failed to build HTTP client".to_string()))?;
        Ok(Self { client })
    }

    fn map_error(url: &str, err: &reqwest::Error) -> ErrorKind {
        if err.is_builder() {
            ErrorKind::InvalidUrl(url.to_string())
        } else if err.is_body() || err.is_decode() {
            ErrorKind::Body(err.to_string())
        } else {
            ErrorKind::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response> {
        let mut request = self.client.get(url);
        if options.cache == CacheMode::Reload {
            request = request.header(CACHE_CONTROL, "no-cache").header(PRAGMA, "no-cache");
        }
        let response = request.send().await.map_err(|e| Self::map_error(url, &e))?;
        let status = response.status().as_u16();
        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
        let body = response.bytes().await.map_err(|e| Self::map_error(url, &e))?;
        tracing::debug!(url, status, bytes = body.len(), reload = options.cache == CacheMode::Reload, "Fetched");
        let mut response = Response::new(url, status, body);
        response.content_type = content_type;
        Ok(response)
    }
}
