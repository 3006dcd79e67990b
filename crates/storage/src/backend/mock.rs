//! In-memory cache storage for testing.

use super::EntryInfoStream;
use crate::error::{ErrorKind, Result};
use crate::models::EntryInfo;
use crate::name::{validate_bucket, validate_key};
use crate::{Bucket, BucketHandle, CacheStorage};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

type Entries = HashMap<String, (OffsetDateTime, Vec<u8>)>;
type Failures = Arc<std::sync::RwLock<HashSet<(Operation, String)>>>;

/// Storage operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`CacheStorage::open`]
    Open,
    /// [`CacheStorage::delete`]
    DeleteBucket,
    /// [`Bucket::entries_stream`] and everything built on it
    List,
    /// [`Bucket::get`]
    Get,
    /// [`Bucket::put`]
    Put,
    /// [`Bucket::delete`]
    Delete,
}

/// In-memory cache storage for testing.
///
/// Buckets are stored in a `HashMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation. Any
/// [`Operation`] can be set to fail for a given bucket to exercise error
/// paths.
///
/// # Examples
///
/// ```
/// use shellsync_storage::backend::{MockStorage, Operation};
/// use shellsync_storage::CacheStorage;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MockStorage::with_entries("app-cache", [
///     ("https://example.com/main.js", b"console.log(1)"),
/// ]);
/// let bucket = storage.open("app-cache").await?;
/// assert!(bucket.contains("https://example.com/main.js").await?);
///
/// storage.fail_on(Operation::Put, "app-cache");
/// assert!(bucket.put("https://example.com/other.js", b"").await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MockStorage {
    name: String,
    buckets: RwLock<HashMap<String, Arc<MockBucket>>>,
    failures: Failures,
}

impl MockStorage {
    /// Create a mock storage with one bucket pre-populated with entries.
    ///
    /// Panics if the bucket name or any key fails validation. If test setup
    /// is wrong, then test should not pass.
    pub fn with_entries(bucket: &str, entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let storage = Self::default();
        storage.seed(bucket, entries);
        storage
    }

    /// Pre-populate (or add to) a bucket without going through the async API.
    pub fn seed(&self, bucket: &str, entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) {
        let Ok(bucket) = validate_bucket(bucket) else {
            // The panic here is DELIBERATE. MockStorage is intended to be
            // used in tests; panics are expected. There is no error result.
            panic!("MockStorage::seed: invalid bucket name {bucket:?}");
        };
        let now = OffsetDateTime::now_utc();
        let mut map = Entries::new();
        for (key, data) in entries {
            let key = key.into();
            if validate_key(&key).is_err() {
                panic!("MockStorage::seed: invalid key {key:?}");
            }
            map.insert(key, (now, data.into()));
        }
        let mut guard = self.buckets.try_write().expect("MockStorage::seed called while storage is in use");
        let handle = guard.entry(bucket.to_string()).or_insert_with(|| self.new_bucket(bucket));
        handle.entries.try_write().expect("MockStorage::seed called while bucket is in use").extend(map);
    }

    /// Change the name of the mock storage.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make `operation` fail for `bucket` until [`clear_failures()`](Self::clear_failures).
    pub fn fail_on(&self, operation: Operation, bucket: &str) {
        self.failures.write().unwrap_or_else(|e| e.into_inner()).insert((operation, bucket.to_string()));
    }

    pub fn clear_failures(&self) {
        self.failures.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Snapshot of a bucket's keys without going through the async API.
    /// Returns `None` if the bucket does not exist.
    pub fn snapshot(&self, bucket: &str) -> Option<Vec<String>> {
        let guard = self.buckets.try_read().ok()?;
        let handle = guard.get(bucket)?;
        let mut keys: Vec<String> = handle.entries.try_read().ok()?.keys().cloned().collect();
        keys.sort();
        Some(keys)
    }

    fn new_bucket(&self, name: &str) -> Arc<MockBucket> {
        Arc::new(MockBucket {
            name: name.to_string(),
            entries: RwLock::new(Entries::new()),
            failures: Arc::clone(&self.failures),
        })
    }
}
impl Default for MockStorage {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            buckets: RwLock::new(HashMap::new()),
            failures: Failures::default(),
        }
    }
}

fn check(failures: &Failures, operation: Operation, bucket: &str) -> Result<()> {
    let failing = failures.read().unwrap_or_else(|e| e.into_inner()).contains(&(operation, bucket.to_string()));
    if failing {
        exn::bail!(ErrorKind::Backend(format!("injected {operation:?} failure in bucket {bucket}")));
    }
    Ok(())
}

#[async_trait]
impl CacheStorage for MockStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, bucket: &str) -> Result<BucketHandle> {
        let bucket = validate_bucket(bucket)?;
        check(&self.failures, Operation::Open, bucket)?;
        let mut guard = self.buckets.write().await;
        let handle = guard.entry(bucket.to_string()).or_insert_with(|| self.new_bucket(bucket));
        Ok(Arc::clone(handle) as BucketHandle)
    }

    async fn has(&self, bucket: &str) -> Result<bool> {
        let bucket = validate_bucket(bucket)?;
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn delete(&self, bucket: &str) -> Result<bool> {
        let bucket = validate_bucket(bucket)?;
        check(&self.failures, Operation::DeleteBucket, bucket)?;
        Ok(self.buckets.write().await.remove(bucket).is_some())
    }

    async fn buckets(&self) -> Result<Vec<String>> {
        Ok(self.buckets.read().await.keys().cloned().collect())
    }
}

struct MockBucket {
    name: String,
    entries: RwLock<Entries>,
    failures: Failures,
}

#[async_trait]
impl Bucket for MockBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn entries_stream<'a>(&'a self) -> EntryInfoStream<'a> {
        Box::pin(stream! {
            if let Err(e) = check(&self.failures, Operation::List, &self.name) {
                yield Err(e);
                return;
            }
            // Snapshot under the read lock, then drop it before yielding to
            // avoid holding the lock across yield points.
            let entries: Vec<EntryInfo> = {
                let guard = self.entries.read().await;
                guard
                    .iter()
                    .map(|(key, (stored, data))| EntryInfo::new(key.clone(), data.len() as u64, *stored))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = validate_key(key)?;
        check(&self.failures, Operation::Get, &self.name)?;
        Ok(self.entries.read().await.get(key).map(|(_stored, data)| data.clone()))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let key = validate_key(key)?;
        check(&self.failures, Operation::Put, &self.name)?;
        self.entries.write().await.insert(key.to_string(), (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        check(&self.failures, Operation::Delete, &self.name)?;
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
