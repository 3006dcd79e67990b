//! Offline caching for a deployed web application.
//!
//! A [`ServiceWorker`] owns one [`Deployment`]: the manifest of every resource
//! with its content fingerprint, plus the application shell that must be
//! available offline. Installing stages the shell; activating reconciles the
//! durable cache against the manifest so that unchanged resources survive a
//! redeploy while changed and removed ones are purged. Requests are then
//! served cache-first, filling the cache on demand.
//!
//! Storage and network access are injected as [`shellsync_storage::CacheStorage`]
//! and [`shellsync_fetch::Fetcher`] implementations.

pub mod deployment;
pub mod error;
pub mod interceptor;
pub mod manifest;
pub mod origin;
pub mod synchronizer;
pub mod worker;

pub use crate::deployment::Deployment;
pub use crate::interceptor::{ActiveManifest, Handled, InterceptDecision, Interceptor, Source};
pub use crate::manifest::{Fingerprint, ResourceKey, ResourceManifest};
pub use crate::origin::Origin;
pub use crate::synchronizer::{CacheStatus, Generations, Reconciliation, Synchronizer};
pub use crate::worker::{Command, ServiceWorker, WorkerState};
