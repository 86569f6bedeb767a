//! ObjectStore trait definition
//!
//! The narrow slice of the object store API used by the paginator and the
//! transfer engine. Kept independent of any SDK so engine logic can be tested
//! against in-memory or mock stores.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Body of a downloaded object, in the order the store delivers it
pub type ObjectStream = BoxStream<'static, Result<Bytes>>;

/// A bucket/key pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    pub bucket: String,
    pub key: String,
}

impl ObjectPath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `s3://bucket/key` or `bucket/key`
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("s3://").unwrap_or(s);
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Listing or head metadata for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Continuation token; `None` on the last page
    pub next_cursor: Option<String>,
}

/// A finished part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Inclusive byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// `bytes=start-end`, as used by ranged copies and reads
    pub fn header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Object store operations needed by kaws
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of keys under `prefix`
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<String>,
        cursor: Option<String>,
    ) -> Result<ListPage>;

    /// Object metadata, `None` if the key does not exist
    async fn head_object(&self, path: &ObjectPath) -> Result<Option<ObjectInfo>>;

    /// Stream the body of `path`; a missing key is [`Error::NotFound`](crate::Error::NotFound)
    async fn get_object(&self, path: &ObjectPath) -> Result<ObjectStream>;

    /// Server-side whole-object copy
    async fn copy_object(&self, src: &ObjectPath, dst: &ObjectPath) -> Result<()>;

    /// Start a multipart upload, returning its id
    async fn create_multipart_upload(
        &self,
        dst: &ObjectPath,
        content_type: Option<String>,
    ) -> Result<String>;

    /// Copy `range` of `src` into part `part_number` of an open upload
    async fn upload_part_copy(
        &self,
        src: &ObjectPath,
        dst: &ObjectPath,
        upload_id: &str,
        part_number: u32,
        range: ByteRange,
    ) -> Result<CompletedPart>;

    /// Upload `body` as part `part_number` of an open upload
    async fn upload_part(
        &self,
        dst: &ObjectPath,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart>;

    async fn complete_multipart_upload(
        &self,
        dst: &ObjectPath,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, dst: &ObjectPath, upload_id: &str) -> Result<()>;

    async fn delete_object(&self, path: &ObjectPath) -> Result<()>;

    /// Whether `bucket` exists and is reachable with these credentials
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create `bucket`, constrained to `region` when given
    async fn create_bucket(&self, bucket: &str, region: Option<String>) -> Result<()>;

    /// Delete an empty bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
}
