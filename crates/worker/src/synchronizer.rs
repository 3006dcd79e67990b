//! Cache synchronizer: keeps the durable cache generation in step with the
//! resource manifest of the current deployment.
//!
//! Three generations (buckets) are involved:
//!
//! - **durable**: the live cache that requests are served from. Created
//!   lazily and kept across activations.
//! - **staging**: shell files fetched at install time, waiting to be
//!   promoted into durable on activation.
//! - **manifest record**: a single entry holding the manifest that the
//!   durable generation was last reconciled against.
//!
//! On activation, [`Synchronizer::reconcile`] compares the new manifest with
//! the record and keeps only the durable entries whose fingerprint is
//! unchanged; everything else is purged and will be fetched again on demand.
//! Any failure wipes all three generations so that stale or half-updated
//! content is never served.

use crate::error::{ErrorKind, Result};
use crate::manifest::{ResourceKey, ResourceManifest};
use crate::origin::Origin;
use exn::ResultExt;
use futures::future::try_join_all;
use shellsync_fetch::{FetchOptions, FetcherHandle, Response};
use shellsync_storage::{BucketHandle, StorageHandle};
use std::collections::HashSet;
use tracing::instrument;

/// Key of the single entry in the manifest record generation.
pub const RECORD_KEY: &str = "manifest";

/// Bucket names of the three cache generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
    pub durable: String,
    pub staging: String,
    pub manifest: String,
}
impl Default for Generations {
    fn default() -> Self {
        Self {
            durable: "shellsync-app-cache".to_string(),
            staging: "shellsync-temp-cache".to_string(),
            manifest: "shellsync-app-manifest".to_string(),
        }
    }
}

/// What a successful [`reconcile()`](Synchronizer::reconcile) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// No usable manifest record existed, so durable was rebuilt from
    /// staging alone.
    pub reset: bool,
    /// Durable entries that survived the eviction pass.
    pub kept: usize,
    /// Durable entries purged as removed, renamed or changed.
    pub evicted: usize,
    /// Staging entries copied into durable.
    pub promoted: usize,
}

/// Snapshot of the cache generations, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub durable_entries: usize,
    pub staging_entries: usize,
    /// Manifest the durable generation was last reconciled against.
    pub record: Option<ResourceManifest>,
    /// Manifest keys with an entry in durable.
    pub cached: Vec<ResourceKey>,
    /// Manifest keys without an entry in durable.
    pub missing: Vec<ResourceKey>,
}

pub struct Synchronizer {
    storage: StorageHandle,
    fetcher: FetcherHandle,
    origin: Origin,
    generations: Generations,
}

impl Synchronizer {
    pub fn new(storage: StorageHandle, fetcher: FetcherHandle, origin: Origin, generations: Generations) -> Self {
        Self {
            storage,
            fetcher,
            origin,
            generations,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    async fn open(&self, bucket: &str) -> Result<BucketHandle> {
        self.storage.open(bucket).await.or_raise(|| ErrorKind::Storage)
    }

    /// Fetch every URL, failing as soon as one fetch fails.
    ///
    /// Nothing is stored until every response is in, so a failed batch
    /// leaves the target bucket exactly as it was.
    async fn fetch_all(&self, urls: Vec<String>, options: FetchOptions) -> Result<Vec<(String, Response)>> {
        let fetches = urls.into_iter().map(|url| async move {
            let response = self.fetcher.fetch_ok(&url, options).await.or_raise(|| ErrorKind::Fetch)?;
            Ok((url, response))
        });
        try_join_all(fetches).await
    }

    /// Fetch the application shell into the staging generation, bypassing
    /// HTTP caches so that the freshest copy is staged.
    #[instrument(skip_all, fields(shell = core.len()))]
    pub async fn prime_shell(&self, core: &[ResourceKey]) -> Result<()> {
        let urls = core.iter().map(|key| self.origin.url_for(key)).collect();
        let responses = self.fetch_all(urls, FetchOptions::reload()).await?;
        let staging = self.open(&self.generations.staging).await?;
        for (url, response) in &responses {
            staging.put(url, &response.body).await.or_raise(|| ErrorKind::Storage)?;
        }
        tracing::info!(staged = responses.len(), "Primed application shell");
        Ok(())
    }

    /// Whether staging holds every shell resource, as left by a completed
    /// [`prime_shell()`](Self::prime_shell) that hasn't been reconciled yet.
    pub async fn staged_shell(&self, core: &[ResourceKey]) -> Result<bool> {
        if !self.storage.has(&self.generations.staging).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(false);
        }
        let staging = self.open(&self.generations.staging).await?;
        for key in core {
            if !staging.contains(&self.origin.url_for(key)).await.or_raise(|| ErrorKind::Storage)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Delete an abandoned staging generation, if any.
    pub async fn discard_staging(&self) -> Result<bool> {
        self.storage.delete(&self.generations.staging).await.or_raise(|| ErrorKind::Storage)
    }

    /// Reconcile the durable generation against `manifest`.
    ///
    /// On failure every generation has been deleted by the time this
    /// returns; the error is returned for reporting only, there is nothing to
    /// retry until the next install.
    #[instrument(skip_all, fields(resources = manifest.len()))]
    pub async fn reconcile(&self, manifest: &ResourceManifest) -> Result<Reconciliation> {
        match self.try_reconcile(manifest).await {
            Ok(outcome) => {
                tracing::info!(
                    reset = outcome.reset,
                    kept = outcome.kept,
                    evicted = outcome.evicted,
                    promoted = outcome.promoted,
                    "Reconciled cache generations"
                );
                Ok(outcome)
            },
            Err(err) => {
                tracing::error!(error = ?err, "Failed to reconcile cache generations; wiping all of them");
                if let Err(rollback) = self.rollback().await {
                    tracing::error!(error = ?rollback, "Rollback incomplete; next activation resets from scratch");
                }
                Err(err)
            },
        }
    }

    async fn try_reconcile(&self, manifest: &ResourceManifest) -> Result<Reconciliation> {
        let record = self.open(&self.generations.manifest).await?;
        let previous = self.read_record(&record).await?;
        // Invalidate the record up front: if this run is interrupted part way
        // through, the next one finds no record and starts from a clean slate.
        record.delete(RECORD_KEY).await.or_raise(|| ErrorKind::Storage)?;
        let staging = self.open(&self.generations.staging).await?;
        let mut outcome = Reconciliation::default();

        let durable = match previous {
            None => {
                tracing::debug!("No manifest record; rebuilding durable generation from staging");
                self.storage.delete(&self.generations.durable).await.or_raise(|| ErrorKind::Storage)?;
                outcome.reset = true;
                self.open(&self.generations.durable).await?
            },
            Some(previous) => {
                let durable = self.open(&self.generations.durable).await?;
                for entry in durable.keys().await.or_raise(|| ErrorKind::Storage)? {
                    let retained =
                        self.origin.logical_key(&entry).is_some_and(|key| manifest.retains(&key, &previous));
                    if retained {
                        outcome.kept += 1;
                        continue;
                    }
                    durable.delete(&entry).await.or_raise(|| ErrorKind::Storage)?;
                    tracing::debug!(entry = %entry, "Evicted stale entry");
                    outcome.evicted += 1;
                }
                durable
            },
        };

        // Eviction is complete; staging is free to reintroduce evicted keys.
        for key in staging.keys().await.or_raise(|| ErrorKind::Storage)? {
            let Some(data) = staging.get(&key).await.or_raise(|| ErrorKind::Storage)? else {
                continue;
            };
            durable.put(&key, &data).await.or_raise(|| ErrorKind::Storage)?;
            outcome.promoted += 1;
        }
        self.storage.delete(&self.generations.staging).await.or_raise(|| ErrorKind::Storage)?;
        record.put(RECORD_KEY, &manifest.to_json()).await.or_raise(|| ErrorKind::Storage)?;
        Ok(outcome)
    }

    async fn read_record(&self, record: &BucketHandle) -> Result<Option<ResourceManifest>> {
        let Some(bytes) = record.get(RECORD_KEY).await.or_raise(|| ErrorKind::Storage)? else {
            return Ok(None);
        };
        match ResourceManifest::from_json(&bytes) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(err) => {
                // Same as having no record at all: nothing in durable can be
                // trusted, so it gets rebuilt.
                tracing::warn!(error = ?err, "Ignoring unreadable manifest record");
                Ok(None)
            },
        }
    }

    /// The manifest the durable generation was last reconciled against.
    pub async fn persisted_manifest(&self) -> Result<Option<ResourceManifest>> {
        if !self.storage.has(&self.generations.manifest).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(None);
        }
        let record = self.open(&self.generations.manifest).await?;
        self.read_record(&record).await
    }

    /// Delete all three generations, leaving an empty, consistent state.
    ///
    /// Attempts every delete even if an earlier one fails, and reports the
    /// first failure.
    pub async fn rollback(&self) -> Result<()> {
        let mut failure = None;
        for bucket in [&self.generations.durable, &self.generations.staging, &self.generations.manifest] {
            if let Err(err) = self.storage.delete(bucket).await {
                tracing::warn!(bucket = %bucket, error = ?err, "Failed to delete cache generation");
                failure.get_or_insert(err);
            }
        }
        match failure {
            Some(err) => Err(err.raise(ErrorKind::Storage)),
            None => {
                tracing::warn!("Deleted every cache generation");
                Ok(())
            },
        }
    }

    /// Fetch into durable every resource in `manifest` that isn't cached yet.
    ///
    /// Returns the number of resources downloaded.
    #[instrument(skip_all, fields(resources = manifest.len()))]
    pub async fn download_offline(&self, manifest: &ResourceManifest) -> Result<usize> {
        let durable = self.open(&self.generations.durable).await?;
        let present = self.logical_keys(&durable).await?;
        let missing: Vec<String> =
            manifest.keys().filter(|key| !present.contains(*key)).map(|key| self.origin.url_for(key)).collect();
        if missing.is_empty() {
            tracing::debug!("Every resource is already available offline");
            return Ok(0);
        }
        let responses = self.fetch_all(missing, FetchOptions::default()).await?;
        for (url, response) in &responses {
            durable.put(url, &response.body).await.or_raise(|| ErrorKind::Storage)?;
        }
        tracing::info!(downloaded = responses.len(), "Downloaded resources for offline use");
        Ok(responses.len())
    }

    async fn logical_keys(&self, bucket: &BucketHandle) -> Result<HashSet<ResourceKey>> {
        let keys = bucket.keys().await.or_raise(|| ErrorKind::Storage)?;
        Ok(keys.iter().filter_map(|entry| self.origin.logical_key(entry)).collect())
    }

    async fn count_entries(&self, bucket: &str) -> Result<usize> {
        if !self.storage.has(bucket).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(0);
        }
        let handle = self.open(bucket).await?;
        Ok(handle.keys().await.or_raise(|| ErrorKind::Storage)?.len())
    }

    /// Report the state of every generation relative to `manifest`.
    pub async fn status(&self, manifest: &ResourceManifest) -> Result<CacheStatus> {
        let present = match self.storage.has(&self.generations.durable).await.or_raise(|| ErrorKind::Storage)? {
            true => self.logical_keys(&self.open(&self.generations.durable).await?).await?,
            false => HashSet::new(),
        };
        let (cached, missing): (Vec<_>, Vec<_>) = manifest.keys().cloned().partition(|key| present.contains(key));
        Ok(CacheStatus {
            durable_entries: self.count_entries(&self.generations.durable).await?,
            staging_entries: self.count_entries(&self.generations.staging).await?,
            record: self.persisted_manifest().await?,
            cached,
            missing,
        })
    }
}
