//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from kaws-core.

use std::fmt;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart as SdkCompletedPart,
    CreateBucketConfiguration,
};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use futures::StreamExt;
use kaws_core::credentials::DEFAULT_REGION;
use kaws_core::{
    ByteRange, CompletedPart, Credentials, Error, ListPage, ObjectInfo, ObjectPath, ObjectStore,
    ObjectStream, Result,
};

/// Provider name reported for keys passed in explicitly
const STATIC_PROVIDER: &str = "kaws-resolved-credentials";

/// S3 client wrapper
///
/// Holds a virtual-hosted client and a path-style client built from the same
/// SDK configuration; requests for buckets whose names can't be used as a
/// host label go through the path-style one.
#[derive(Clone)]
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    path_style: aws_sdk_s3::Client,
}

impl fmt::Debug for S3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Client").finish_non_exhaustive()
    }
}

impl S3Client {
    /// Connect using resolved credentials
    ///
    /// The ambient credential defers to the SDK's default provider chain
    /// (instance profile included); anything else is used as static keys. A
    /// global credential takes the SDK default region.
    pub async fn connect(credentials: &Credentials) -> Result<Self> {
        let region = match credentials.region() {
            Some(region) => RegionProviderChain::first_try(aws_config::Region::new(
                region.to_string(),
            )),
            None => RegionProviderChain::default_provider().or_else(DEFAULT_REGION),
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        let credential = credentials.credential();
        if credential.is_ambient() {
            tracing::debug!("Connecting with the default credential chain");
        } else {
            tracing::debug!(access = %credential.masked_access(), "Connecting with resolved keys");
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                credential.access.clone(),
                credential.secret.clone(),
                credential.token.clone(),
                None,
                STATIC_PROVIDER,
            ));
        }

        let config = loader.load().await;
        Ok(Self::from_sdk_config(&config))
    }

    /// Build both addressing styles from an existing SDK configuration
    pub fn from_sdk_config(config: &aws_config::SdkConfig) -> Self {
        let inner = aws_sdk_s3::Client::new(config);
        let path_style = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(config)
                .force_path_style(true)
                .build(),
        );
        Self { inner, path_style }
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    /// Client suited to `bucket`'s name
    fn client_for(&self, bucket: &str) -> &aws_sdk_s3::Client {
        if is_dns_compatible(bucket) {
            &self.inner
        } else {
            &self.path_style
        }
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E: fmt::Display>(error: &SdkError<E, HttpResponse>) -> String {
        match error {
            SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let meta = service_err.raw();
                let mut msg = format!("Service error: {err}");
                if let Some(code) = meta.headers().get("x-amz-error-code") {
                    msg.push_str(&format!(" (code: {code})"));
                }
                msg
            }
            SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {err:?}")
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(err) => format!("Network dispatch error: {err:?}"),
            SdkError::ResponseError(err) => format!("Response error: {err:?}"),
            _ => error.to_string(),
        }
    }

    /// Map an SDK failure onto the core error kinds by HTTP status
    fn map_sdk_error<E: fmt::Display>(
        error: SdkError<E, HttpResponse>,
        resource: impl fmt::Display,
    ) -> Error {
        let status = error.raw_response().map(|r| r.status().as_u16());
        let message = Self::format_sdk_error(&error);
        match status {
            Some(404) => Error::NotFound(resource.to_string()),
            Some(401 | 403) => Error::Auth(format!("{resource}: {message}")),
            Some(status) => Error::Network(format!("status {status}: {message}")),
            None => Error::Network(message),
        }
    }
}

/// Value of the `x-amz-copy-source` header for `src`
fn copy_source(src: &ObjectPath) -> String {
    format!("{}/{}", src.bucket, urlencoding::encode(&src.key))
}

fn part_number(n: u32) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::Config(format!("Part number out of range: {n}")))
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Bucket configuration for `region`; the default region takes none
fn bucket_configuration(region: Option<&str>) -> Option<CreateBucketConfiguration> {
    let region = region.filter(|r| *r != DEFAULT_REGION)?;
    Some(
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build(),
    )
}

/// Whether `bucket` can be addressed as a DNS host label
///
/// 3 to 63 characters of lowercase letters, digits, dots and hyphens,
/// starting and ending with a letter or digit, with no empty or
/// hyphen-bounded labels and not shaped like an IPv4 address.
pub fn is_dns_compatible(bucket: &str) -> bool {
    if !(3..=63).contains(&bucket.len()) {
        return false;
    }
    if !bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return false;
    }
    let labels_ok = bucket.split('.').all(|label| {
        !label.is_empty() && !label.starts_with('-') && !label.ends_with('-')
    });
    if !labels_ok {
        return false;
    }
    bucket.parse::<std::net::Ipv4Addr>().is_err()
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<String>,
        cursor: Option<String>,
    ) -> Result<ListPage> {
        let response = self
            .client_for(bucket)
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix)
            .set_continuation_token(cursor)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, format!("Bucket not found: {bucket}")))?;

        let objects = response
            .contents()
            .iter()
            .map(|object| {
                let info = ObjectInfo::new(
                    object.key().unwrap_or_default(),
                    object.size().unwrap_or(0).max(0) as u64,
                );
                match object.e_tag() {
                    Some(etag) => info.with_etag(trim_etag(etag)),
                    None => info,
                }
            })
            .collect();

        let next_cursor = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_cursor,
        })
    }

    async fn head_object(&self, path: &ObjectPath) -> Result<Option<ObjectInfo>> {
        let result = self
            .client_for(&path.bucket)
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return match Self::map_sdk_error(e, path) {
                    Error::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let info = ObjectInfo::new(
            path.key.clone(),
            response.content_length().unwrap_or(0).max(0) as u64,
        );
        Ok(Some(match response.e_tag() {
            Some(etag) => info.with_etag(trim_etag(etag)),
            None => info,
        }))
    }

    async fn get_object(&self, path: &ObjectPath) -> Result<ObjectStream> {
        let response = self
            .client_for(&path.bucket)
            .get_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;

        let resource = path.to_string();
        let body = futures::stream::try_unfold(response.body, move |mut body| {
            let resource = resource.clone();
            async move {
                match body.try_next().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(Error::Network(format!("Reading {resource}: {e}"))),
                }
            }
        });
        Ok(body.boxed())
    }

    async fn copy_object(&self, src: &ObjectPath, dst: &ObjectPath) -> Result<()> {
        self.client_for(&dst.bucket)
            .copy_object()
            .copy_source(copy_source(src))
            .bucket(&dst.bucket)
            .key(&dst.key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, src))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        dst: &ObjectPath,
        content_type: Option<String>,
    ) -> Result<String> {
        let response = self
            .client_for(&dst.bucket)
            .create_multipart_upload()
            .bucket(&dst.bucket)
            .key(&dst.key)
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, dst))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::General(format!("No upload id returned for {dst}")))
    }

    async fn upload_part_copy(
        &self,
        src: &ObjectPath,
        dst: &ObjectPath,
        upload_id: &str,
        part: u32,
        range: ByteRange,
    ) -> Result<CompletedPart> {
        let response = self
            .client_for(&dst.bucket)
            .upload_part_copy()
            .bucket(&dst.bucket)
            .key(&dst.key)
            .upload_id(upload_id)
            .part_number(part_number(part)?)
            .copy_source(copy_source(src))
            .copy_source_range(range.header())
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, src))?;

        let etag = response
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .map(trim_etag)
            .ok_or_else(|| Error::General(format!("No ETag returned for part {part} of {dst}")))?;

        Ok(CompletedPart {
            part_number: part,
            etag,
        })
    }

    async fn upload_part(
        &self,
        dst: &ObjectPath,
        upload_id: &str,
        part: u32,
        body: Bytes,
    ) -> Result<CompletedPart> {
        let response = self
            .client_for(&dst.bucket)
            .upload_part()
            .bucket(&dst.bucket)
            .key(&dst.key)
            .upload_id(upload_id)
            .part_number(part_number(part)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, dst))?;

        let etag = response
            .e_tag()
            .map(trim_etag)
            .ok_or_else(|| Error::General(format!("No ETag returned for part {part} of {dst}")))?;

        Ok(CompletedPart {
            part_number: part,
            etag,
        })
    }

    async fn complete_multipart_upload(
        &self,
        dst: &ObjectPath,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                Ok(SdkCompletedPart::builder()
                    .part_number(part_number(part.part_number)?)
                    .e_tag(format!("\"{}\"", part.etag))
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.client_for(&dst.bucket)
            .complete_multipart_upload()
            .bucket(&dst.bucket)
            .key(&dst.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, dst))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, dst: &ObjectPath, upload_id: &str) -> Result<()> {
        self.client_for(&dst.bucket)
            .abort_multipart_upload()
            .bucket(&dst.bucket)
            .key(&dst.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, dst))?;
        Ok(())
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        self.client_for(&path.bucket)
            .delete_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let result = self
            .client_for(bucket)
            .head_bucket()
            .bucket(bucket)
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) => match Self::map_sdk_error(e, format!("Bucket not found: {bucket}")) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_bucket(&self, bucket: &str, region: Option<String>) -> Result<()> {
        self.client_for(bucket)
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(bucket_configuration(region.as_deref()))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, bucket))?;
        tracing::info!(bucket, region = region.as_deref().unwrap_or(DEFAULT_REGION), "Created bucket");
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client_for(bucket)
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, format!("Bucket not found: {bucket}")))?;
        tracing::info!(bucket, "Deleted bucket");
        Ok(())
    }
}
