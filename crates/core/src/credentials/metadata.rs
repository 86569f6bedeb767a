//! Instance metadata service client
//!
//! Fetches the temporary credentials vended for an instance role. Every
//! failure mode (no route, timeout, bad status, bad payload) is a miss.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Default base URL of the role credential listing
pub const DEFAULT_METADATA_URL: &str =
    "http://169.254.169.254/latest/meta-data/iam/security-credentials/";

/// Default request timeout; the endpoint is link-local so anything slower means
/// we are not on an instance
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_millis(100);

/// Temporary credentials as returned by the metadata endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataCredentials {
    pub access_key_id: String,
    #[serde(alias = "SecretAccessKeyId")]
    pub secret_access_key: String,
    pub token: String,
    pub expiration: String,
}

/// Source of role credentials
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Credentials for the role named `role`, or `None` on any failure
    async fn role_credentials(&self, role: &str) -> Option<MetadataCredentials>;
}

/// HTTP client for the instance metadata endpoint
#[derive(Debug, Clone)]
pub struct ImdsClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ImdsClient {
    /// Client for the standard endpoint with the default timeout
    pub fn new() -> Result<Self> {
        let base_url = Url::parse(DEFAULT_METADATA_URL).expect("Valid metadata URL");
        Self::with_endpoint(base_url, DEFAULT_METADATA_TIMEOUT)
    }

    /// Client for a custom endpoint, e.g. a local emulator
    ///
    /// Fails if the HTTP client cannot be built, rather than falling back to
    /// one without the timeout and proxy settings.
    pub fn with_endpoint(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| Error::Network(format!("Failed to build metadata client: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn role_url(&self, role: &str) -> Option<Url> {
        self.base_url.join(role).ok()
    }
}

#[async_trait]
impl MetadataClient for ImdsClient {
    async fn role_credentials(&self, role: &str) -> Option<MetadataCredentials> {
        let url = self.role_url(role)?;

        let response = match self.http.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Instance metadata unavailable");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "Instance metadata refused");
            return None;
        }

        match response.json::<MetadataCredentials>().await {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Malformed instance metadata credentials");
                None
            }
        }
    }
}
