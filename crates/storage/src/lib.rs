//! Named cache buckets.
//!
//! A [`CacheStorage`] is a collection of named [`Bucket`]s, and each bucket
//! maps a request key (usually a URL) to the bytes of a stored response.
//! Buckets are created lazily on [`open()`](CacheStorage::open) and removed
//! wholesale with [`delete()`](CacheStorage::delete).

pub mod backend;
pub mod error;
mod models;
mod name;

pub use crate::backend::{Bucket, CacheStorage};
pub use crate::models::EntryInfo;
pub use crate::name::{validate_bucket, validate_key};
use std::sync::Arc;

pub type StorageHandle = Arc<dyn CacheStorage + Send + Sync>;
pub type BucketHandle = Arc<dyn Bucket + Send + Sync>;
