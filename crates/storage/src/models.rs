//! Storage models.

use time::OffsetDateTime;

/// Entry metadata returned by buckets.
///
/// Used for listing operations and status reporting; the stored bytes
/// themselves are only loaded through [`Bucket::get`](crate::Bucket::get).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Request key the entry was stored under
    pub key: String,
    /// Stored response size in bytes
    pub size: u64,
    /// When the entry was last written
    pub stored: OffsetDateTime,
}
impl EntryInfo {
    pub fn new(key: impl Into<String>, size: u64, stored: OffsetDateTime) -> Self {
        Self { key: key.into(), size, stored }
    }
}
