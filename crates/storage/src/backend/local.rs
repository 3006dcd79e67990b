//! Local filesystem cache storage.
//!
//! Every bucket is a directory under the configured root, holding a single
//! generation directory that is created on open. A handle is bound to the
//! generation it opened, so once the bucket is deleted and opened again a
//! stale handle can no longer write into it. Entry keys are
//! arbitrary strings (usually URLs) so they can't be used as file names
//! directly: each entry is stored as a pair of files named after the BLAKE3
//! hash of its key, one holding the data and a `.key` sidecar holding the
//! original key. The sidecar is written last and removed first, so a
//! half-written entry is never listed.

use crate::backend::EntryInfoStream;
use crate::error::{ErrorKind, Result};
use crate::models::EntryInfo;
use crate::name::{validate_bucket, validate_key};
use crate::{Bucket, BucketHandle, CacheStorage};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::fs;

const KEY_EXTENSION: &str = "key";
const GENERATION_PREFIX: &str = "gen-";

static GENERATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Fixed width, so names sort in creation order.
fn generation_name() -> String {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos().unsigned_abs();
    let seq = GENERATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{GENERATION_PREFIX}{nanos:032x}-{seq:016x}")
}

/// The oldest generation directory of a bucket, if any.
async fn current_generation(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| map_io_error(e, dir))?;
    let mut oldest: Option<String> = None;
    while let Some(entry) = entries.next_entry().await.map_err(|e| map_io_error(e, dir))? {
        let is_dir = entry.file_type().await.map_err(ErrorKind::Io)?.is_dir();
        if let Some(name) = entry.file_name().to_str()
            && is_dir
            && name.starts_with(GENERATION_PREFIX)
            && oldest.as_deref().is_none_or(|current| name < current)
        {
            oldest = Some(name.to_string());
        }
    }
    Ok(oldest.map(|name| dir.join(name)))
}

/// Local filesystem cache storage.
///
/// # Examples
///
/// ```no_run
/// use shellsync_storage::backend::LocalStorage;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = LocalStorage::new("local", "/var/cache/shellsync")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalStorage {
    name: String,
    /// Directory holding one subdirectory per bucket
    root: PathBuf,
}
impl LocalStorage {
    /// Create a new local filesystem storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::Backend(format!("storage root must be absolute: {}", root.display())));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::Backend(format!("storage root is not a directory: {}", root.display())));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_bucket(bucket)?))
    }
}

fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
    match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        _ => ErrorKind::Io(e),
    }
}

#[async_trait]
impl CacheStorage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, bucket: &str) -> Result<BucketHandle> {
        let root = self.bucket_dir(bucket)?;
        fs::create_dir_all(&root).await.map_err(|e| map_io_error(e, &root))?;
        let dir = match current_generation(&root).await? {
            Some(dir) => dir,
            None => {
                let created = root.join(generation_name());
                fs::create_dir_all(&created).await.map_err(|e| map_io_error(e, &created))?;
                // Concurrent opens settle on the oldest generation.
                current_generation(&root).await?.unwrap_or(created)
            },
        };
        tracing::trace!(bucket, dir = %dir.display(), "Opened bucket");
        Ok(Arc::new(LocalBucket { name: bucket.to_string(), dir }))
    }

    async fn has(&self, bucket: &str) -> Result<bool> {
        let dir = self.bucket_dir(bucket)?;
        Ok(fs::try_exists(&dir).await.map_err(|e| map_io_error(e, &dir))?)
    }

    async fn delete(&self, bucket: &str) -> Result<bool> {
        let dir = self.bucket_dir(bucket)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => exn::bail!(map_io_error(e, &dir)),
        }
    }

    async fn buckets(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| map_io_error(e, &self.root))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io_error(e, &self.root))? {
            let is_dir = entry.file_type().await.map_err(ErrorKind::Io)?.is_dir();
            // Anything that isn't a valid bucket name wasn't created by us.
            if let Some(name) = entry.file_name().to_str()
                && is_dir
                && validate_bucket(name).is_ok()
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

struct LocalBucket {
    name: String,
    dir: PathBuf,
}
impl LocalBucket {
    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(blake3::hash(key.as_bytes()).to_hex().as_str())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_path(key).with_extension(KEY_EXTENSION)
    }

    async fn read_entry(&self, key_path: &Path) -> Result<Option<EntryInfo>> {
        let key = match fs::read_to_string(key_path).await {
            Ok(key) => key,
            // Deleted between listing the directory and reading the sidecar.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => exn::bail!(map_io_error(e, key_path)),
        };
        let data_path = key_path.with_extension("");
        let metadata = match fs::metadata(&data_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => exn::bail!(map_io_error(e, &data_path)),
        };
        let stored = metadata
            .modified()
            .map(OffsetDateTime::from)
            .or_raise(|| ErrorKind::Backend(format!("no modification time for {}", data_path.display())))?;
        Ok(Some(EntryInfo::new(key, metadata.len(), stored)))
    }
}

#[async_trait]
impl Bucket for LocalBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn entries_stream<'a>(&'a self) -> EntryInfoStream<'a> {
        Box::pin(stream! {
            let mut entries = match fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                // A bucket deleted out from under an open handle is simply empty.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
                Err(err) => {
                    yield Err(exn::Exn::from(map_io_error(err, &self.dir)));
                    return;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => { yield Err(exn::Exn::from(map_io_error(e, &self.dir))); continue; },
                };
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != KEY_EXTENSION) {
                    continue;
                }
                match self.read_entry(&path).await {
                    Ok(Some(info)) => yield Ok(info),
                    Ok(None) => {},
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = validate_key(key)?;
        let key_path = self.key_path(key);
        if !fs::try_exists(&key_path).await.map_err(|e| map_io_error(e, &key_path))? {
            return Ok(None);
        }
        let data_path = self.data_path(key);
        match fs::read(&data_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => exn::bail!(map_io_error(e, &data_path)),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let key = validate_key(key)?;
        let data_path = self.data_path(key);
        fs::write(&data_path, data).await.map_err(|e| map_io_error(e, &data_path))?;
        let key_path = self.key_path(key);
        fs::write(&key_path, key.as_bytes()).await.map_err(|e| map_io_error(e, &key_path))?;
        tracing::trace!(bucket = %self.name, key, bytes = data.len(), "Stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        let key_path = self.key_path(key);
        let existed = match fs::remove_file(&key_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => exn::bail!(map_io_error(e, &key_path)),
        };
        let data_path = self.data_path(key);
        match fs::remove_file(&data_path).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => exn::bail!(map_io_error(e, &data_path)),
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new("local", temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalStorage::new("name", temp_dir.path()).is_ok());
        assert!(LocalStorage::new("name", "relative/path").is_err());
        assert!(LocalStorage::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/root");
        LocalStorage::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_dir, storage) = storage();
        let bucket = storage.open("cache").await.unwrap();
        bucket.put("https://example.com/main.js", b"console.log(1)").await.unwrap();
        let data = bucket.get("https://example.com/main.js").await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"console.log(1)"[..]));
        assert_eq!(bucket.get("https://example.com/missing.js").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (_dir, storage) = storage();
        let bucket = storage.open("cache").await.unwrap();
        bucket.put("key", b"old").await.unwrap();
        bucket.put("key", b"new").await.unwrap();
        assert_eq!(bucket.get("key").await.unwrap().as_deref(), Some(&b"new"[..]));
        assert_eq!(bucket.keys().await.unwrap(), vec!["key".to_string()]);
    }

    #[tokio::test]
    async fn test_entries_keep_original_keys() {
        let (_dir, storage) = storage();
        let bucket = storage.open("cache").await.unwrap();
        bucket.put("https://example.com/", b"index").await.unwrap();
        bucket.put("https://example.com/assets/a.png", b"png!").await.unwrap();
        let mut entries = bucket.entries().await.unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "https://example.com/");
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[1].key, "https://example.com/assets/a.png");
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let (_dir, storage) = storage();
        let bucket = storage.open("cache").await.unwrap();
        bucket.put("key", b"data").await.unwrap();
        assert!(bucket.delete("key").await.unwrap());
        assert!(!bucket.delete("key").await.unwrap());
        assert!(bucket.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let (_dir, storage) = storage();
        assert!(!storage.has("cache").await.unwrap());
        let bucket = storage.open("cache").await.unwrap();
        bucket.put("key", b"data").await.unwrap();
        assert!(storage.has("cache").await.unwrap());
        assert_eq!(storage.buckets().await.unwrap(), vec!["cache".to_string()]);
        assert!(storage.delete("cache").await.unwrap());
        assert!(!storage.delete("cache").await.unwrap());
        // A stale handle sees an empty bucket rather than an error.
        assert!(bucket.keys().await.unwrap().is_empty());
        assert_eq!(bucket.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_bucket_rejected() {
        let (_dir, storage) = storage();
        let err = storage.open("../escape").await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_revive_bucket() {
        let (_dir, storage) = storage();
        let stale = storage.open("cache").await.unwrap();
        stale.put("https://app/old.js", b"old").await.unwrap();
        assert!(storage.delete("cache").await.unwrap());

        let err = stale.put("https://app/x.js", b"late").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(!storage.has("cache").await.unwrap());

        let fresh = storage.open("cache").await.unwrap();
        assert!(fresh.keys().await.unwrap().is_empty());
        // The handle is tied to the deleted bucket, not to the name.
        assert!(stale.put("https://app/y.js", b"later").await.is_err());
        assert_eq!(fresh.get("https://app/y.js").await.unwrap(), None);
        assert!(stale.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_shares_generation() {
        let (_dir, storage) = storage();
        let first = storage.open("cache").await.unwrap();
        let second = storage.open("cache").await.unwrap();
        first.put("key", b"data").await.unwrap();
        assert_eq!(second.get("key").await.unwrap().as_deref(), Some(&b"data"[..]));
        assert_eq!(storage.buckets().await.unwrap(), vec!["cache".to_string()]);
    }
}
