//! kaws-s3: S3 SDK adapter for kaws
//!
//! Implements the [`kaws_core::ObjectStore`] trait on top of aws-sdk-s3.

pub mod client;

use std::sync::Arc;

use kaws_core::{Credentials, ObjectStore, Result};

pub use client::{S3Client, is_dns_compatible};

/// Open an object store for `credentials`
pub async fn connect(credentials: &Credentials) -> Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(S3Client::connect(credentials).await?))
}
