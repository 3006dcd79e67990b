//! Cache storage traits and implementations.
//!
//! This module defines the [`CacheStorage`] and [`Bucket`] traits, which
//! provide a unified interface over named buckets of stored responses,
//! regardless of where the bytes actually live.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalStorage;
#[cfg(feature = "mock")]
pub use self::mock::{MockStorage, Operation};
use crate::BucketHandle;
use crate::error::Result;
use crate::models::EntryInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

type EntryInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<EntryInfo>> + Send + 'a>>;

/// A collection of named buckets.
///
/// Buckets are created on first [`open()`](Self::open) and live until they
/// are [`delete()`](Self::delete)d. A handle obtained before a delete no
/// longer refers to the bucket known by that name: its reads come back empty
/// and its writes either fail or land in a detached bucket, never in one
/// opened afterwards. Open the name again to get the fresh, empty bucket.
///
/// # Examples
///
/// ```
/// use shellsync_storage::{CacheStorage, error::Result};
///
/// async fn copy_all(storage: &dyn CacheStorage, from: &str, to: &str) -> Result<usize> {
///     let source = storage.open(from).await?;
///     let target = storage.open(to).await?;
///     let keys = source.keys().await?;
///     for key in &keys {
///         if let Some(data) = source.get(key).await? {
///             target.put(key, &data).await?;
///         }
///     }
///     Ok(keys.len())
/// }
/// ```
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Name of the configured storage (used for logging only).
    fn name(&self) -> &str;

    /// Open a bucket, creating it if it does not exist yet.
    async fn open(&self, bucket: &str) -> Result<BucketHandle>;

    /// Check whether a bucket exists.
    async fn has(&self, bucket: &str) -> Result<bool>;

    /// Delete a bucket and every entry in it.
    ///
    /// Returns `false` if there was no bucket by that name.
    async fn delete(&self, bucket: &str) -> Result<bool>;

    /// Names of all existing buckets, in no particular order.
    async fn buckets(&self) -> Result<Vec<String>>;
}

/// A single named bucket of `key -> bytes` entries.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Name the bucket was opened with.
    fn name(&self) -> &str;

    /// List metadata for all entries.
    ///
    /// Default implementation collects [`entries_stream()`](Self::entries_stream)
    /// into a [`Vec`].
    async fn entries(&self) -> Result<Vec<EntryInfo>> {
        self.entries_stream().try_collect().await
    }

    /// Stream metadata for all entries, in no particular order.
    fn entries_stream<'a>(&'a self) -> EntryInfoStream<'a>;

    /// Keys of all entries, in no particular order.
    async fn keys(&self) -> Result<Vec<String>> {
        self.entries_stream().map_ok(|info| info.key).try_collect().await
    }

    /// Look up the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether an entry exists.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Store `data` under `key`, replacing any previous entry.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove the entry stored under `key`.
    ///
    /// Returns `false` if there was no such entry.
    async fn delete(&self, key: &str) -> Result<bool>;
}
