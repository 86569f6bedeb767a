//! kaws-core: Core library for the kaws AWS helpers
//!
//! This crate provides the core functionality for kaws, including:
//! - Credential resolution across files, environment, and instance metadata
//! - An on-disk cache for instance metadata credentials
//! - Lazy paginated listings with bounded backoff retry
//! - Chunked multipart copy/upload and a parallel bulk copy/delete/download engine
//! - Configuration management
//!
//! This crate is designed to be independent of any specific S3 SDK; the
//! [`ObjectStore`] trait is implemented by `kaws-s3`.

pub mod bulk;
pub mod config;
pub mod credentials;
pub mod download;
pub mod env;
pub mod error;
pub mod multipart;
pub mod paginate;
pub mod retry;
pub mod traits;

pub use bulk::{BulkEngine, BulkOptions, BulkReport, BulkSummary, TaskOutcome, TaskReport};
pub use config::{Config, ConfigManager};
pub use credentials::{
    AccessMode, Credential, CredentialCache, CredentialPaths, CredentialResolver, Credentials,
    RegionCredential, ResolveOptions, publish_to_environment,
};
pub use download::{download_object, local_path};
pub use env::Env;
pub use error::{Error, Result};
pub use multipart::{
    ChunkedCopyOptions, UploadOptions, UploadSummary, Verify, copy_object_chunked, plan_chunks,
    upload_file,
};
pub use paginate::{Cursor, list_objects, paginate};
pub use retry::{Backoff, RetryBuilder, RetryConfig, StepBackoff, is_retryable_error, retry_with_backoff};
pub use traits::{
    ByteRange, CompletedPart, ListPage, ObjectInfo, ObjectPath, ObjectStore, ObjectStream,
};
