//! In-memory object store shared by the engine tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use kaws_core::{
    ByteRange, CompletedPart, Error, ListPage, ObjectInfo, ObjectPath, ObjectStore, ObjectStream,
    Result,
};

type Upload = (ObjectPath, BTreeMap<u32, Bytes>);

/// Size of the chunks `get_object` streams bodies in
const BODY_CHUNK: usize = 4;

/// Object store backed by maps, with optional per-key latency
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Bytes>>,
    uploads: Mutex<HashMap<String, Upload>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Duration,
    page_size: usize,
    next_upload: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    list_calls: AtomicUsize,
    failing_parts: Mutex<HashSet<u32>>,
    aborted: Mutex<Vec<String>>,
    buckets: Mutex<BTreeMap<String, Option<String>>>,
    get_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            default_delay: Duration::ZERO,
            page_size: 1000,
            next_upload: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            failing_parts: Mutex::new(HashSet::new()),
            aborted: Mutex::new(Vec::new()),
            buckets: Mutex::new(BTreeMap::new()),
            get_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Latency of every mutating call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Latency of mutating calls touching `key`
    pub fn slow_key(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn uploads_started(&self) -> usize {
        self.next_upload.load(Ordering::SeqCst)
    }

    /// Make every upload of `part_number` fail with a retryable error
    pub fn fail_part(&self, part_number: u32) {
        self.failing_parts.lock().unwrap().insert(part_number);
    }

    /// Upload ids passed to `abort_multipart_upload`, in call order
    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Region a bucket was created with, `Some(None)` for the default
    pub fn bucket_region(&self, bucket: &str) -> Option<Option<String>> {
        self.buckets.lock().unwrap().get(bucket).cloned()
    }

    /// Multipart uploads neither completed nor aborted
    pub fn open_uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().keys().cloned().collect()
    }

    /// Simulate a slow mutating call on `key`, tracking concurrency
    async fn work(&self, key: &str) {
        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(self.default_delay);

        let _guard = InFlight::enter(self);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Counts a call as in flight until dropped, including on cancellation
struct InFlight<'a>(&'a MemoryStore);

impl<'a> InFlight<'a> {
    fn enter(store: &'a MemoryStore) -> Self {
        let now = store.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        store.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(store)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<String>,
        cursor: Option<String>,
    ) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        let mut matching = objects
            .iter()
            .filter(|((b, k), _)| {
                b == bucket && prefix.as_deref().is_none_or(|p| k.starts_with(p))
            })
            .filter(|((_, k), _)| cursor.as_deref().is_none_or(|c| k.as_str() > c))
            .map(|((_, k), v)| ObjectInfo::new(k.clone(), v.len() as u64));

        let page: Vec<ObjectInfo> = matching.by_ref().take(self.page_size).collect();
        let more = matching.next().is_some();
        Ok(ListPage {
            next_cursor: more.then(|| page.last().map(|o| o.key.clone())).flatten(),
            objects: page,
        })
    }

    async fn head_object(&self, path: &ObjectPath) -> Result<Option<ObjectInfo>> {
        Ok(self
            .get(&path.bucket, &path.key)
            .map(|data| ObjectInfo::new(path.key.clone(), data.len() as u64)))
    }

    async fn get_object(&self, path: &ObjectPath) -> Result<ObjectStream> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.work(&path.key).await;
        let data = self
            .get(&path.bucket, &path.key)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(BODY_CHUNK)
            .map(|start| Ok(data.slice(start..(start + BODY_CHUNK).min(data.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn copy_object(&self, src: &ObjectPath, dst: &ObjectPath) -> Result<()> {
        self.work(&src.key).await;
        let data = self
            .get(&src.bucket, &src.key)
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        self.insert(&dst.bucket, &dst.key, data);
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        dst: &ObjectPath,
        _content_type: Option<String>,
    ) -> Result<String> {
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads
            .lock()
            .unwrap()
            .insert(id.clone(), (dst.clone(), BTreeMap::new()));
        Ok(id)
    }

    async fn upload_part_copy(
        &self,
        src: &ObjectPath,
        _dst: &ObjectPath,
        upload_id: &str,
        part_number: u32,
        range: ByteRange,
    ) -> Result<CompletedPart> {
        self.work(&src.key).await;
        let data = self
            .get(&src.bucket, &src.key)
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        let slice = data.slice(range.start as usize..=range.end as usize);
        self.store_part(upload_id, part_number, slice)
    }

    async fn upload_part(
        &self,
        dst: &ObjectPath,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<CompletedPart> {
        self.work(&dst.key).await;
        self.store_part(upload_id, part_number, body)
    }

    async fn complete_multipart_upload(
        &self,
        dst: &ObjectPath,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let (_, stored) = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?;

        let mut data = Vec::new();
        for part in parts {
            let body = stored
                .get(&part.part_number)
                .ok_or_else(|| Error::General(format!("missing part {}", part.part_number)))?;
            data.extend_from_slice(body);
        }
        self.insert(&dst.bucket, &dst.key, data);
        Ok(())
    }

    async fn abort_multipart_upload(&self, _dst: &ObjectPath, upload_id: &str) -> Result<()> {
        self.aborted.lock().unwrap().push(upload_id.to_string());
        self.uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        self.work(&path.key).await;
        self.objects
            .lock()
            .unwrap()
            .remove(&(path.bucket.clone(), path.key.clone()));
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, region: Option<String>) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(bucket) {
            return Err(Error::General(format!("BucketAlreadyOwnedByYou: {bucket}")));
        }
        buckets.insert(bucket.to_string(), region);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        if !self.keys(bucket).is_empty() {
            return Err(Error::General(format!("BucketNotEmpty: {bucket}")));
        }
        self.buckets
            .lock()
            .unwrap()
            .remove(bucket)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Bucket not found: {bucket}")))
    }
}

impl MemoryStore {
    fn store_part(&self, upload_id: &str, part_number: u32, body: Bytes) -> Result<CompletedPart> {
        if self.failing_parts.lock().unwrap().contains(&part_number) {
            return Err(Error::Network("503 Service Unavailable".to_string()));
        }
        let mut uploads = self.uploads.lock().unwrap();
        let (_, parts) = uploads
            .get_mut(upload_id)
            .ok_or_else(|| Error::NotFound(upload_id.to_string()))?;
        parts.insert(part_number, body);
        Ok(CompletedPart {
            part_number,
            etag: format!("etag-{part_number}"),
        })
    }
}
