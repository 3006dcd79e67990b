//! Request interception.
//!
//! Requests for resources listed in the active manifest are served from the
//! durable generation, with misses fetched from the network and written back.
//! Everything else goes straight to the network.

use crate::error::{ErrorKind, Result};
use crate::manifest::{ResourceKey, ResourceManifest};
use crate::origin::Origin;
use exn::ResultExt;
use futures::FutureExt;
use futures::future::BoxFuture;
use shellsync_fetch::{FetchOptions, FetcherHandle, Response};
use shellsync_storage::StorageHandle;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptDecision {
    /// Not a cacheable resource; forward to the network untouched.
    PassThrough,
    /// A resource of the active manifest.
    ServeFromCache(ResourceKey),
}

/// The manifest requests are currently being resolved against.
///
/// Shared between the worker, which publishes it after a successful
/// activation, and every interceptor serving requests. `None` means nothing
/// is cacheable.
#[derive(Debug, Clone, Default)]
pub struct ActiveManifest(Arc<RwLock<Option<Arc<ResourceManifest>>>>);

impl ActiveManifest {
    pub fn publish(&self, manifest: ResourceManifest) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(manifest));
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn current(&self) -> Option<Arc<ResourceManifest>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Where a [`Handled`] response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
}

/// Pending write of a network response into the durable generation.
pub type Populate = BoxFuture<'static, Result<()>>;

/// Outcome of intercepting a request.
///
/// On a cache miss the response is available immediately, while the copy
/// into the durable generation is still pending. The interception only
/// counts as finished once that store has been driven to completion, see
/// [`finish()`](Self::finish).
pub struct Handled {
    pub response: Response,
    pub source: Source,
    populate: Option<Populate>,
}

impl Handled {
    fn cached(response: Response) -> Self {
        Self {
            response,
            source: Source::Cache,
            populate: None,
        }
    }

    fn network(response: Response, populate: Option<Populate>) -> Self {
        Self {
            response,
            source: Source::Network,
            populate,
        }
    }

    /// Whether a store into the durable generation is still pending.
    pub fn is_populating(&self) -> bool {
        self.populate.is_some()
    }

    /// Split into the response and the pending store, so the caller can
    /// answer first and drive the store afterwards.
    pub fn into_parts(self) -> (Response, Option<Populate>) {
        (self.response, self.populate)
    }

    /// Drive the pending store (if any) to completion and return the response.
    ///
    /// A failed store fails the whole interception.
    pub async fn finish(self) -> Result<Response> {
        if let Some(populate) = self.populate {
            populate.await?;
        }
        Ok(self.response)
    }
}
impl Debug for Handled {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Handled")
            .field("response", &self.response)
            .field("source", &self.source)
            .field("populating", &self.is_populating())
            .finish()
    }
}

#[derive(Clone)]
pub struct Interceptor {
    storage: StorageHandle,
    fetcher: FetcherHandle,
    origin: Origin,
    durable: String,
    active: ActiveManifest,
}

impl Interceptor {
    pub fn new(
        storage: StorageHandle,
        fetcher: FetcherHandle,
        origin: Origin,
        durable: impl Into<String>,
        active: ActiveManifest,
    ) -> Self {
        Self {
            storage,
            fetcher,
            origin,
            durable: durable.into(),
            active,
        }
    }

    /// Decide how a request is served.
    pub fn resolve(&self, url: &str) -> InterceptDecision {
        let Some(manifest) = self.active.current() else {
            return InterceptDecision::PassThrough;
        };
        match self.origin.logical_key(url) {
            Some(key) if manifest.contains(&key) => InterceptDecision::ServeFromCache(key),
            _ => InterceptDecision::PassThrough,
        }
    }

    /// Serve a request according to [`resolve()`](Self::resolve).
    ///
    /// Network responses are returned whatever their status; only a 2xx
    /// response to a cacheable request schedules a store.
    #[tracing::instrument(skip(self))]
    pub async fn handle(&self, url: &str) -> Result<Handled> {
        let identity = self.origin.request_identity(url);
        let key = match self.resolve(url) {
            InterceptDecision::PassThrough => {
                let response = self.fetch(&identity, FetchOptions::default()).await?;
                return Ok(Handled::network(response, None));
            },
            InterceptDecision::ServeFromCache(key) => key,
        };

        let durable = self.storage.open(&self.durable).await.or_raise(|| ErrorKind::Storage)?;
        if let Some(body) = durable.get(&identity).await.or_raise(|| ErrorKind::Storage)? {
            tracing::debug!(%key, "Cache hit");
            return Ok(Handled::cached(Response::new(identity, 200, body)));
        }

        tracing::debug!(%key, "Cache miss");
        let response = self.fetch(&identity, FetchOptions::reload()).await?;
        if !response.is_success() {
            tracing::debug!(%key, status = response.status, "Not caching unsuccessful response");
            return Ok(Handled::network(response, None));
        }
        let body = response.body.clone();
        let populate = async move {
            durable.put(&identity, &body).await.or_raise(|| ErrorKind::Storage)?;
            tracing::debug!(entry = %identity, "Populated durable cache");
            Ok(())
        }
        .boxed();
        Ok(Handled::network(response, Some(populate)))
    }

    async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response> {
        self.fetcher.fetch(url, options).await.or_raise(|| ErrorKind::Fetch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellsync_fetch::{CacheMode, MockFetcher};
    use shellsync_storage::backend::{MockStorage, Operation};
    use std::sync::Arc;

    const ORIGIN: &str = "https://app.example.com";
    const DURABLE: &str = "shellsync-app-cache";

    fn url(path: &str) -> String {
        format!("{ORIGIN}/{path}")
    }

    struct Fixture {
        storage: Arc<MockStorage>,
        fetcher: Arc<MockFetcher>,
        active: ActiveManifest,
        interceptor: Interceptor,
    }

    fn fixture(resources: &[(&str, &str)]) -> Fixture {
        let storage = Arc::new(MockStorage::default());
        let fetcher = Arc::new(MockFetcher::default());
        let active = ActiveManifest::default();
        active.publish(ResourceManifest::from_pairs(resources.iter().copied()).unwrap());
        let interceptor =
            Interceptor::new(storage.clone(), fetcher.clone(), Origin::parse(ORIGIN).unwrap(), DURABLE, active.clone());
        Fixture {
            storage,
            fetcher,
            active,
            interceptor,
        }
    }

    fn cached(path: &str) -> InterceptDecision {
        InterceptDecision::ServeFromCache(ResourceKey::new(path).unwrap())
    }

    #[test]
    fn test_resolve() {
        let fx = fixture(&[("/", "01"), ("main.js", "02")]);
        let resolve = |u: &str| fx.interceptor.resolve(u);
        assert_eq!(resolve(ORIGIN), cached("/"));
        assert_eq!(resolve(&url("")), cached("/"));
        assert_eq!(resolve(&url("#/settings")), cached("/"));
        assert_eq!(resolve(&url("main.js")), cached("main.js"));
        assert_eq!(resolve(&url("other.js")), InterceptDecision::PassThrough);
        assert_eq!(resolve("https://cdn.example.com/main.js"), InterceptDecision::PassThrough);
        assert_eq!(resolve("https://App.Example.com/main.js"), cached("main.js"));
        // Only the root is addressed with a fragment.
        assert_eq!(resolve(&url("main.js#sourcemap")), InterceptDecision::PassThrough);
    }

    #[test]
    fn test_resolve_without_active_manifest() {
        let fx = fixture(&[("main.js", "02")]);
        fx.active.clear();
        assert_eq!(fx.interceptor.resolve(&url("main.js")), InterceptDecision::PassThrough);
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let fx = fixture(&[("main.js", "02")]);
        fx.storage.seed(DURABLE, [(url("main.js"), b"cached".to_vec())]);
        let handled = fx.interceptor.handle(&url("main.js")).await.unwrap();
        assert_eq!(handled.source, Source::Cache);
        assert!(!handled.is_populating());
        assert_eq!(handled.response.body, "cached");
        assert!(fx.fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cache_miss_populates_after_responding() {
        let fx = fixture(&[("/", "01")]);
        fx.fetcher.route(url(""), "<html>");
        let handled = fx.interceptor.handle(&url("#/route")).await.unwrap();
        assert_eq!(handled.source, Source::Network);
        assert!(handled.is_populating());
        // Responded, but not stored yet.
        assert_eq!(fx.storage.snapshot(DURABLE).unwrap(), Vec::<String>::new());

        let response = handled.finish().await.unwrap();
        assert_eq!(response.body, "<html>");
        assert_eq!(fx.storage.snapshot(DURABLE).unwrap(), vec![url("")]);
        assert_eq!(fx.fetcher.requests(), vec![(url(""), FetchOptions::reload())]);

        let handled = fx.interceptor.handle(&url("")).await.unwrap();
        assert_eq!(handled.source, Source::Cache);
        assert_eq!(fx.fetcher.request_count(&url("")), 1);
    }

    #[tokio::test]
    async fn test_unsuccessful_miss_is_not_cached() {
        let fx = fixture(&[("main.js", "02")]);
        fx.fetcher.route_status(url("main.js"), 503, "busy");
        let handled = fx.interceptor.handle(&url("main.js")).await.unwrap();
        assert_eq!(handled.response.status, 503);
        assert!(!handled.is_populating());
        handled.finish().await.unwrap();
        assert_eq!(fx.storage.snapshot(DURABLE).unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_pass_through_is_not_cached() {
        let fx = fixture(&[("main.js", "02")]);
        fx.fetcher.route("https://cdn.example.com/lib.js", "lib");
        let handled = fx.interceptor.handle("https://cdn.example.com/lib.js#x").await.unwrap();
        assert_eq!(handled.source, Source::Network);
        assert!(!handled.is_populating());
        assert_eq!(fx.fetcher.requests()[0].1.cache, CacheMode::Default);
        assert!(fx.storage.snapshot(DURABLE).is_none());
    }

    #[tokio::test]
    async fn test_failed_store_fails_interception() {
        let fx = fixture(&[("main.js", "02")]);
        fx.fetcher.route(url("main.js"), "main();");
        fx.storage.fail_on(Operation::Put, DURABLE);
        let handled = fx.interceptor.handle(&url("main.js")).await.unwrap();
        let err = handled.finish().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
    }

    #[tokio::test]
    async fn test_network_failure_propagates() {
        let fx = fixture(&[("main.js", "02")]);
        fx.fetcher.fail(url("main.js"));
        let err = fx.interceptor.handle(&url("main.js")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch));
    }
}
