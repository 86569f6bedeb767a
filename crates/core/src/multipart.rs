//! Multipart copy and upload
//!
//! Objects at least `part_size` long are moved in 1-based chunks through a
//! multipart upload. Every chunk has its own retry budget; once a chunk gives
//! up, no further chunk is started and the error carries the upload id. With
//! `abort_on_failure` the upload is aborted before the error is returned,
//! otherwise it is left open for the caller.

use std::path::Path;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};
use crate::retry::{RetryConfig, is_retryable_error, retry_with_backoff};
use crate::traits::{ByteRange, CompletedPart, ObjectPath, ObjectStore};

/// Part size for single large-object copies and uploads
pub const DEFAULT_PART_SIZE: u64 = 500_000_000;

/// Part size used when copying whole buckets
pub const BULK_PART_SIZE: u64 = 50_000_000;

/// Provider limit on parts per upload
pub const MAX_PARTS: u64 = 10_000;

/// One part of a multipart transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based part number
    pub index: u32,
    pub range: ByteRange,
}

/// Split `size` bytes into consecutive `part_size` chunks, the last one short
///
/// The chunks cover `0..size` exactly. A zero-length object has no chunks.
pub fn plan_chunks(size: u64, part_size: u64) -> Result<Vec<Chunk>> {
    if part_size == 0 {
        return Err(Error::Config("Part size must be greater than zero".to_string()));
    }

    let count = size.div_ceil(part_size);
    if count > MAX_PARTS {
        return Err(Error::Config(format!(
            "{size} bytes in {part_size} byte parts needs {count} parts, more than {MAX_PARTS}"
        )));
    }

    Ok((0..count)
        .map(|i| {
            let start = i * part_size;
            let end = (start + part_size).min(size) - 1;
            Chunk {
                index: i as u32 + 1,
                range: ByteRange { start, end },
            }
        })
        .collect())
}

/// Tuning for [`copy_object_chunked`]
#[derive(Debug, Clone)]
pub struct ChunkedCopyOptions {
    pub part_size: u64,
    /// Per-chunk retry budget
    pub retry: RetryConfig,
    /// Chunks copied concurrently
    pub parallel: usize,
    /// Abort the multipart upload when a chunk or the completion fails
    pub abort_on_failure: bool,
}

impl Default for ChunkedCopyOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            retry: RetryConfig {
                max_attempts: 2,
                ..RetryConfig::default()
            },
            parallel: 1,
            abort_on_failure: false,
        }
    }
}

/// Server-side copy of `src` (`size` bytes) to `dst`
///
/// Returns the number of chunks copied; a plain copy counts as one.
pub async fn copy_object_chunked(
    store: &dyn ObjectStore,
    src: &ObjectPath,
    size: u64,
    dst: &ObjectPath,
    options: &ChunkedCopyOptions,
) -> Result<usize> {
    if size < options.part_size {
        retry_with_backoff(
            &options.retry,
            || store.copy_object(src, dst),
            is_retryable_error,
        )
        .await?;
        tracing::debug!(src = %src, dst = %dst, size, "Copied object");
        return Ok(1);
    }

    let chunks = plan_chunks(size, options.part_size)?;
    let upload_id = retry_with_backoff(
        &options.retry,
        || store.create_multipart_upload(dst, None),
        is_retryable_error,
    )
    .await?;
    tracing::debug!(
        src = %src,
        dst = %dst,
        upload_id = %upload_id,
        parts = chunks.len(),
        "Started multipart copy"
    );

    let result = copy_parts(store, src, dst, &upload_id, &chunks, options).await;
    abort_if_failed(store, dst, &upload_id, options.abort_on_failure, result).await?;
    Ok(chunks.len())
}

async fn copy_parts(
    store: &dyn ObjectStore,
    src: &ObjectPath,
    dst: &ObjectPath,
    upload_id: &str,
    chunks: &[Chunk],
    options: &ChunkedCopyOptions,
) -> Result<()> {
    let parts: Vec<CompletedPart> = stream::iter(chunks.iter().copied())
        .map(|chunk| async move {
            let part = retry_with_backoff(
                &options.retry,
                || store.upload_part_copy(src, dst, upload_id, chunk.index, chunk.range),
                is_retryable_error,
            )
            .await
            .map_err(|e| part_error(dst, upload_id, chunk.index, e))?;
            tracing::debug!(key = %dst.key, part = chunk.index, "Copied part");
            Ok::<_, Error>(part)
        })
        .buffered(options.parallel.max(1))
        .try_collect()
        .await?;

    retry_with_backoff(
        &options.retry,
        || store.complete_multipart_upload(dst, upload_id, parts.clone()),
        is_retryable_error,
    )
    .await
}

/// Abort `upload_id` when `result` is an error and `abort` is set
///
/// The original error is returned either way; a failed abort is only logged.
async fn abort_if_failed<T>(
    store: &dyn ObjectStore,
    dst: &ObjectPath,
    upload_id: &str,
    abort: bool,
    result: Result<T>,
) -> Result<T> {
    if abort && result.is_err() {
        match store.abort_multipart_upload(dst, upload_id).await {
            Ok(()) => tracing::info!(key = %dst.key, upload_id, "Aborted multipart upload"),
            Err(e) => tracing::warn!(
                key = %dst.key,
                upload_id,
                error = %e,
                "Failed to abort multipart upload"
            ),
        }
    }
    result
}

fn part_error(dst: &ObjectPath, upload_id: &str, part: u32, error: Error) -> Error {
    let attempts = error.attempts().unwrap_or(1);
    let message = match error {
        Error::RetryExhausted { last, .. } => last.to_string(),
        other => other.to_string(),
    };
    tracing::warn!(key = %dst.key, part, attempts, error = %message, "Giving up on part");
    Error::Copy {
        key: dst.key.clone(),
        upload_id: upload_id.to_string(),
        part,
        attempts,
        message,
    }
}

/// How to confirm an upload landed intact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verify {
    None,
    /// Compare the remote object size with the local file size
    #[default]
    Size,
    /// Compare part ETags and the combined multipart ETag with local MD5s
    Md5,
}

/// Tuning for [`upload_file`]
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub part_size: u64,
    /// Parts uploaded concurrently
    pub parallel: usize,
    pub retry: RetryConfig,
    pub verify: Verify,
    pub content_type: Option<String>,
    /// Abort the multipart upload when a part or the completion fails
    pub abort_on_failure: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            parallel: 1,
            retry: ChunkedCopyOptions::default().retry,
            verify: Verify::default(),
            content_type: None,
            abort_on_failure: false,
        }
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub parts: usize,
    pub size: u64,
    /// Multipart ETag computed from the local data
    pub etag: String,
}

/// ETag the provider assigns to a multipart object: `md5(part md5s)-N`
pub fn multipart_etag<D: AsRef<[u8]>>(part_digests: &[D]) -> String {
    let mut hasher = Md5::new();
    for digest in part_digests {
        hasher.update(digest.as_ref());
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_digests.len())
}

/// Upload a local file to `dst` as a multipart object
pub async fn upload_file(
    store: &dyn ObjectStore,
    path: &Path,
    dst: &ObjectPath,
    options: &UploadOptions,
) -> Result<UploadSummary> {
    let size = tokio::fs::metadata(path).await?.len();
    let chunks = plan_chunks(size, options.part_size)?;
    if chunks.is_empty() {
        return Err(Error::Config(format!(
            "{} is empty, nothing to upload",
            path.display()
        )));
    }

    let upload_id = retry_with_backoff(
        &options.retry,
        || store.create_multipart_upload(dst, options.content_type.clone()),
        is_retryable_error,
    )
    .await?;
    tracing::debug!(
        path = %path.display(),
        dst = %dst,
        upload_id = %upload_id,
        parts = chunks.len(),
        "Started multipart upload"
    );

    let result = upload_parts(store, path, dst, &upload_id, &chunks, options).await;
    let etag = abort_if_failed(store, dst, &upload_id, options.abort_on_failure, result).await?;

    if options.verify != Verify::None {
        let remote = store
            .head_object(dst)
            .await?
            .ok_or_else(|| Error::NotFound(dst.to_string()))?;
        match options.verify {
            Verify::Size if remote.size != size => {
                return Err(Error::Integrity {
                    key: dst.key.clone(),
                    local: format!("{size} bytes"),
                    remote: format!("{} bytes", remote.size),
                });
            }
            Verify::Md5 => {
                check_etag(dst, &etag, remote.etag.as_deref().unwrap_or_default())?;
            }
            _ => {}
        }
    }

    Ok(UploadSummary {
        parts: chunks.len(),
        size,
        etag,
    })
}

/// Upload every chunk and complete the upload, returning the multipart ETag
async fn upload_parts(
    store: &dyn ObjectStore,
    path: &Path,
    dst: &ObjectPath,
    upload_id: &str,
    chunks: &[Chunk],
    options: &UploadOptions,
) -> Result<String> {
    let uploaded: Vec<(CompletedPart, Vec<u8>)> = stream::iter(chunks.iter().copied())
        .map(|chunk| async move {
            let body = read_chunk(path, chunk.range)
                .await
                .map_err(|e| part_error(dst, upload_id, chunk.index, e))?;
            let digest = Md5::digest(&body).to_vec();
            let part = retry_with_backoff(
                &options.retry,
                || store.upload_part(dst, upload_id, chunk.index, body.clone()),
                is_retryable_error,
            )
            .await
            .map_err(|e| part_error(dst, upload_id, chunk.index, e))?;

            if options.verify == Verify::Md5 {
                check_etag(dst, &hex::encode(&digest), &part.etag)?;
            }
            tracing::debug!(key = %dst.key, part = chunk.index, bytes = chunk.range.len(), "Uploaded part");
            Ok::<_, Error>((part, digest))
        })
        .buffered(options.parallel.max(1))
        .try_collect()
        .await?;

    let (parts, digests): (Vec<CompletedPart>, Vec<Vec<u8>>) = uploaded.into_iter().unzip();
    retry_with_backoff(
        &options.retry,
        || store.complete_multipart_upload(dst, upload_id, parts.clone()),
        is_retryable_error,
    )
    .await?;
    Ok(multipart_etag(&digests))
}

fn check_etag(dst: &ObjectPath, local: &str, remote: &str) -> Result<()> {
    let remote = remote.trim_matches('"');
    if local.eq_ignore_ascii_case(remote) {
        return Ok(());
    }
    Err(Error::Integrity {
        key: dst.key.clone(),
        local: format!("MD5 {local}"),
        remote: format!("MD5 {remote}"),
    })
}

async fn read_chunk(path: &Path, range: ByteRange) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; range.len() as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockObjectStore, ObjectInfo};
    use mockall::predicate::eq;
    use std::io::Write;

    fn src() -> ObjectPath {
        ObjectPath::new("src", "big.bin")
    }

    fn dst() -> ObjectPath {
        ObjectPath::new("dst", "big.bin")
    }

    #[test]
    fn test_plan_chunks_covers_every_byte() {
        let chunks = plan_chunks(1_200_000_000, 500_000_000).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(chunks[0].range, ByteRange { start: 0, end: 499_999_999 });
        assert_eq!(
            chunks[1].range,
            ByteRange {
                start: 500_000_000,
                end: 999_999_999
            }
        );
        assert_eq!(
            chunks[2].range,
            ByteRange {
                start: 1_000_000_000,
                end: 1_199_999_999
            }
        );
        let total: u64 = chunks.iter().map(|c| c.range.len()).sum();
        assert_eq!(total, 1_200_000_000);
    }

    #[test]
    fn test_plan_chunks_exact_multiple() {
        let chunks = plan_chunks(1000, 500).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].range, ByteRange { start: 500, end: 999 });
        assert!(plan_chunks(0, 500).unwrap().is_empty());
    }

    #[test]
    fn test_plan_chunks_rejects_bad_sizes() {
        assert!(matches!(plan_chunks(10, 0), Err(Error::Config(_))));
        assert!(matches!(plan_chunks(10_001, 1), Err(Error::Config(_))));
    }

    #[test]
    fn test_multipart_etag() {
        let a = Md5::digest(b"hello ").to_vec();
        let b = Md5::digest(b"world").to_vec();
        let etag = multipart_etag(&[a.clone(), b.clone()]);
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);
        assert_ne!(etag, multipart_etag(&[b, a]));
    }

    #[tokio::test]
    async fn test_small_object_uses_single_copy() {
        let mut store = MockObjectStore::new();
        store
            .expect_copy_object()
            .withf(|s, d| s.bucket == "src" && d.bucket == "dst")
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_create_multipart_upload().times(0);

        let copied = copy_object_chunked(&store, &src(), 10, &dst(), &ChunkedCopyOptions::default())
            .await
            .unwrap();
        assert_eq!(copied, 1);
    }

    #[tokio::test]
    async fn test_large_object_copied_in_parts() {
        let mut store = MockObjectStore::new();
        store
            .expect_create_multipart_upload()
            .times(1)
            .returning(|_, _| Ok("upload-1".to_string()));
        store
            .expect_upload_part_copy()
            .times(3)
            .returning(|_, _, upload_id, part, _| {
                assert_eq!(upload_id, "upload-1");
                Ok(CompletedPart {
                    part_number: part,
                    etag: format!("etag-{part}"),
                })
            });
        store
            .expect_complete_multipart_upload()
            .withf(|_, upload_id, parts| {
                upload_id.to_string() == "upload-1"
                    && parts.iter().map(|p| p.part_number).collect::<Vec<_>>() == vec![1, 2, 3]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let options = ChunkedCopyOptions::default();
        let copied = copy_object_chunked(&store, &src(), 1_200_000_000, &dst(), &options)
            .await
            .unwrap();
        assert_eq!(copied, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_stops_later_chunks() {
        let mut store = MockObjectStore::new();
        store
            .expect_create_multipart_upload()
            .returning(|_, _| Ok("upload-1".to_string()));
        store
            .expect_upload_part_copy()
            .with(
                mockall::predicate::always(),
                mockall::predicate::always(),
                mockall::predicate::always(),
                eq(1),
                mockall::predicate::always(),
            )
            .times(1)
            .returning(|_, _, _, part, _| {
                Ok(CompletedPart {
                    part_number: part,
                    etag: "e1".to_string(),
                })
            });
        store
            .expect_upload_part_copy()
            .with(
                mockall::predicate::always(),
                mockall::predicate::always(),
                mockall::predicate::always(),
                eq(2),
                mockall::predicate::always(),
            )
            .times(2)
            .returning(|_, _, _, _, _| Err(Error::Network("503 Service Unavailable".to_string())));
        store
            .expect_upload_part_copy()
            .with(
                mockall::predicate::always(),
                mockall::predicate::always(),
                mockall::predicate::always(),
                eq(3),
                mockall::predicate::always(),
            )
            .times(0);
        store.expect_complete_multipart_upload().times(0);
        store.expect_abort_multipart_upload().times(0);

        let err = copy_object_chunked(
            &store,
            &src(),
            1_200_000_000,
            &dst(),
            &ChunkedCopyOptions::default(),
        )
        .await
        .unwrap_err();

        match err {
            Error::Copy {
                key,
                upload_id,
                part,
                attempts,
                ..
            } => {
                assert_eq!(key, "big.bin");
                assert_eq!(upload_id, "upload-1");
                assert_eq!(part, 2);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_aborts_upload_when_asked() {
        let mut store = MockObjectStore::new();
        store
            .expect_create_multipart_upload()
            .times(1)
            .returning(|_, _| Ok("upload-7".to_string()));
        store
            .expect_upload_part_copy()
            .returning(|_, _, _, _, _| Err(Error::Network("503 Service Unavailable".to_string())));
        store.expect_complete_multipart_upload().times(0);
        store
            .expect_abort_multipart_upload()
            .withf(|d, upload_id| d.key == "big.bin" && upload_id == "upload-7")
            .times(1)
            .returning(|_, _| Ok(()));

        let options = ChunkedCopyOptions {
            abort_on_failure: true,
            ..Default::default()
        };
        let err = copy_object_chunked(&store, &src(), 1_200_000_000, &dst(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Copy { part: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_complete_are_retried() {
        let mut store = MockObjectStore::new();
        let mut creates = 0;
        store.expect_create_multipart_upload().times(2).returning(move |_, _| {
            creates += 1;
            if creates == 1 {
                Err(Error::Network("connection reset by peer".to_string()))
            } else {
                Ok("upload-2".to_string())
            }
        });
        store.expect_upload_part_copy().times(3).returning(|_, _, _, part, _| {
            Ok(CompletedPart {
                part_number: part,
                etag: format!("etag-{part}"),
            })
        });
        let mut completes = 0;
        store
            .expect_complete_multipart_upload()
            .times(2)
            .returning(move |_, _, _| {
                completes += 1;
                if completes == 1 {
                    Err(Error::Network("503 Slow Down".to_string()))
                } else {
                    Ok(())
                }
            });
        store.expect_abort_multipart_upload().times(0);

        let copied = copy_object_chunked(
            &store,
            &src(),
            1_200_000_000,
            &dst(),
            &ChunkedCopyOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(copied, 3);
    }

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn echo_md5_store(remote: ObjectInfo) -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store
            .expect_create_multipart_upload()
            .withf(|_, content_type| content_type.as_deref() == Some("text/plain"))
            .returning(|_, _| Ok("upload-9".to_string()));
        store
            .expect_upload_part()
            .times(3)
            .returning(|_, _, part, body| {
                Ok(CompletedPart {
                    part_number: part,
                    etag: format!("\"{}\"", hex::encode(Md5::digest(&body))),
                })
            });
        store
            .expect_complete_multipart_upload()
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_head_object()
            .returning(move |_| Ok(Some(remote.clone())));
        store
    }

    fn upload_options(verify: Verify) -> UploadOptions {
        UploadOptions {
            part_size: 10,
            verify,
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upload_md5_verified() {
        let content = b"0123456789abcdefghijKLMNO";
        let file = temp_file(content);
        let digests: Vec<Vec<u8>> = content
            .chunks(10)
            .map(|c| Md5::digest(c).to_vec())
            .collect();
        let expected = multipart_etag(&digests);

        let store = echo_md5_store(ObjectInfo::new("big.bin", 25).with_etag(expected.clone()));
        let summary = upload_file(&store, file.path(), &dst(), &upload_options(Verify::Md5))
            .await
            .unwrap();

        assert_eq!(summary.parts, 3);
        assert_eq!(summary.size, 25);
        assert_eq!(summary.etag, expected);
    }

    #[tokio::test]
    async fn test_upload_md5_mismatch_is_integrity_error() {
        let file = temp_file(b"0123456789abcdefghijKLMNO");
        let store = echo_md5_store(
            ObjectInfo::new("big.bin", 25).with_etag("00000000000000000000000000000000-3"),
        );

        let err = upload_file(&store, file.path(), &dst(), &upload_options(Verify::Md5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_upload_size_mismatch_is_integrity_error() {
        let file = temp_file(b"0123456789abcdefghijKLMNO");
        let store = echo_md5_store(ObjectInfo::new("big.bin", 24));

        let err = upload_file(&store, file.path(), &dst(), &upload_options(Verify::Size))
            .await
            .unwrap_err();
        match err {
            Error::Integrity { local, remote, .. } => {
                assert_eq!(local, "25 bytes");
                assert_eq!(remote, "24 bytes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_upload_empty_file_rejected() {
        let file = temp_file(b"");
        let store = MockObjectStore::new();
        let err = upload_file(&store, file.path(), &dst(), &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
