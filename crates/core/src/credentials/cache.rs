//! On-disk cache of instance metadata credentials
//!
//! One YAML file per (account, access mode):
//! `<root>/<account>-<mode>/keys.yml`. Entries are replaced wholesale and
//! written through a temporary file renamed into place, so readers see either
//! the old or the new entry. A file that cannot be read or parsed is a miss.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};

use super::metadata::MetadataClient;
use super::{AccessMode, Credential};
use crate::error::{Error, Result};

const CACHE_FILE: &str = "keys.yml";

/// Accepted expiry formats, with and without fractional seconds
const EXPIRATION_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S.%fZ", "%Y-%m-%dT%H:%M:%SZ"];

/// A cached set of temporary credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub access: String,
    pub secret: String,
    pub token: String,
    pub expiration: String,
    pub account: String,
    pub readmode: AccessMode,
}

impl CacheEntry {
    /// Parse `expiration` as a UTC timestamp
    pub fn expires_at(&self) -> Option<Timestamp> {
        parse_expiration(&self.expiration)
    }

    /// Convert into a session credential tagged with the account
    pub fn to_credential(&self) -> Credential {
        Credential::new(&self.access, &self.secret)
            .with_token(&self.token)
            .with_env(&self.account)
            .with_mode(self.readmode)
    }
}

fn parse_expiration(value: &str) -> Option<Timestamp> {
    EXPIRATION_FORMATS.iter().find_map(|format| {
        DateTime::strptime(format, value)
            .ok()
            .and_then(|dt| dt.to_zoned(TimeZone::UTC).ok())
            .map(|zoned| zoned.timestamp())
    })
}

/// True iff `now` is strictly before the entry's expiry
///
/// An expiry in neither accepted format makes the entry invalid.
pub fn is_valid_at(entry: &CacheEntry, now: Timestamp) -> bool {
    match entry.expires_at() {
        Some(expiry) if now < expiry => true,
        Some(_) => {
            tracing::info!(account = %entry.account, "Credential cache has expired");
            false
        }
        None => {
            tracing::warn!(
                account = %entry.account,
                expiration = %entry.expiration,
                "Unrecognized credential cache expiration"
            );
            false
        }
    }
}

/// Cache directory handle
#[derive(Debug, Clone)]
pub struct CredentialCache {
    root: PathBuf,
}

impl CredentialCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the entry for (account, mode)
    pub fn entry_path(&self, account: &str, mode: AccessMode) -> PathBuf {
        self.root
            .join(format!("{account}-{mode}"))
            .join(CACHE_FILE)
    }

    /// Read the entry for (account, mode), `None` if absent or unreadable
    pub fn load(&self, account: &str, mode: AccessMode) -> Option<CacheEntry> {
        let path = self.entry_path(account, mode);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable credential cache");
                return None;
            }
        };

        match serde_yaml::from_str::<CacheEntry>(&content) {
            Ok(entry) => {
                tracing::info!(path = %path.display(), "Loaded credential cache");
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt credential cache");
                None
            }
        }
    }

    /// [`load`](Self::load) on the blocking thread pool
    pub async fn load_async(&self, account: &str, mode: AccessMode) -> Option<CacheEntry> {
        let cache = self.clone();
        let account = account.to_string();
        tokio::task::spawn_blocking(move || cache.load(&account, mode))
            .await
            .ok()
            .flatten()
    }

    /// [`store`](Self::store) on the blocking thread pool
    pub async fn store_async(&self, entry: &CacheEntry) -> Result<PathBuf> {
        let cache = self.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || cache.store(&entry))
            .await
            .map_err(|e| Error::General(format!("Credential cache write panicked: {e}")))?
    }

    /// Whether `entry` has not yet expired
    pub fn is_valid(&self, entry: &CacheEntry) -> bool {
        is_valid_at(entry, Timestamp::now())
    }

    /// Replace the entry for (entry.account, entry.readmode)
    pub fn store(&self, entry: &CacheEntry) -> Result<PathBuf> {
        let path = self.entry_path(&entry.account, entry.readmode);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        create_private_dir(&self.root)?;
        create_private_dir(&dir)?;

        let content = serde_yaml::to_string(entry)?;
        let tmp = dir.join(format!("{CACHE_FILE}.{}.tmp", std::process::id()));
        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(path)
    }

    /// Fetch fresh credentials for `account` and cache them
    ///
    /// Returns `None` when the metadata service gives nothing usable. A
    /// failure to write the cache is logged; the fetched entry is still
    /// returned.
    pub async fn fetch(
        &self,
        client: &dyn MetadataClient,
        account: &str,
        mode: AccessMode,
    ) -> Option<CacheEntry> {
        let fetched = client.role_credentials(account).await?;
        let entry = CacheEntry {
            access: fetched.access_key_id,
            secret: fetched.secret_access_key,
            token: fetched.token,
            expiration: fetched.expiration,
            account: account.to_string(),
            readmode: mode,
        };

        if let Err(e) = self.store_async(&entry).await {
            tracing::warn!(account = %account, error = %e, "Failed to write credential cache");
        }

        Some(entry)
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MetadataCredentials;
    use async_trait::async_trait;
    use jiff::ToSpan;
    use tempfile::TempDir;

    fn entry(expiration: &str) -> CacheEntry {
        CacheEntry {
            access: "ASIAEXAMPLE".to_string(),
            secret: "secret".to_string(),
            token: "token".to_string(),
            expiration: expiration.to_string(),
            account: "stack_iam".to_string(),
            readmode: AccessMode::Readwrite,
        }
    }

    fn at(value: &str) -> Timestamp {
        value.parse().unwrap()
    }

    #[test]
    fn test_is_valid_fractional_format() {
        let cache = entry("2024-05-01T16:00:00.000Z");
        assert!(is_valid_at(&cache, at("2024-05-01T15:59:59Z")));
        assert!(!is_valid_at(&cache, at("2024-05-01T16:00:01Z")));
    }

    #[test]
    fn test_is_valid_whole_second_format() {
        let cache = entry("2024-05-01T16:00:00Z");
        assert!(is_valid_at(&cache, at("2024-05-01T15:59:59Z")));
        assert!(!is_valid_at(&cache, at("2024-05-01T16:00:01Z")));
    }

    #[test]
    fn test_expiry_instant_is_invalid() {
        let cache = entry("2024-05-01T16:00:00Z");
        assert!(!is_valid_at(&cache, at("2024-05-01T16:00:00Z")));
    }

    #[test]
    fn test_unparseable_expiry_is_invalid() {
        let cache = entry("next tuesday");
        assert!(cache.expires_at().is_none());
        assert!(!is_valid_at(&cache, at("2000-01-01T00:00:00Z")));
    }

    #[test]
    fn test_is_valid_against_clock() {
        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path());
        let future = (Timestamp::now() + 1.hour()).strftime("%Y-%m-%dT%H:%M:%SZ").to_string();
        let past = (Timestamp::now() - 1.hour()).strftime("%Y-%m-%dT%H:%M:%S.%fZ").to_string();
        assert!(cache.is_valid(&entry(&future)));
        assert!(!cache.is_valid(&entry(&past)));
    }

    #[test]
    fn test_store_then_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path().join("cache"));
        let original = entry("2024-05-01T16:00:00Z");

        let path = cache.store(&original).unwrap();
        assert_eq!(path, temp.path().join("cache/stack_iam-readwrite/keys.yml"));

        let loaded = cache.load("stack_iam", AccessMode::Readwrite).unwrap();
        assert_eq!(loaded, original);
        assert!(cache.load("stack_iam", AccessMode::Readonly).is_none());
    }

    #[test]
    fn test_store_overwrites_wholesale() {
        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path());
        cache.store(&entry("2024-05-01T16:00:00Z")).unwrap();

        let mut newer = entry("2024-05-02T16:00:00Z");
        newer.token = "rotated".to_string();
        cache.store(&newer).unwrap();

        let loaded = cache.load("stack_iam", AccessMode::Readwrite).unwrap();
        assert_eq!(loaded, newer);
    }

    #[test]
    fn test_corrupt_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path());
        let path = cache.entry_path("stack_iam", AccessMode::Readwrite);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "access: [unterminated").unwrap();

        assert!(cache.load("stack_iam", AccessMode::Readwrite).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_directory_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path().join("cache"));
        let path = cache.store(&entry("2024-05-01T16:00:00Z")).unwrap();

        let mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_entry_to_credential() {
        let credential = entry("2024-05-01T16:00:00Z").to_credential();
        assert_eq!(credential.access, "ASIAEXAMPLE");
        assert_eq!(credential.token.as_deref(), Some("token"));
        assert_eq!(credential.env.as_deref(), Some("stack_iam"));
        assert_eq!(credential.mode, Some(AccessMode::Readwrite));
    }

    struct FixedMetadata(Option<MetadataCredentials>);

    #[async_trait]
    impl MetadataClient for FixedMetadata {
        async fn role_credentials(&self, _role: &str) -> Option<MetadataCredentials> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_fetch_persists_entry() {
        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path());
        let client = FixedMetadata(Some(MetadataCredentials {
            access_key_id: "ASIANEW".to_string(),
            secret_access_key: "newsecret".to_string(),
            token: "newtoken".to_string(),
            expiration: "2030-01-01T00:00:00Z".to_string(),
        }));

        let fetched = cache
            .fetch(&client, "stack_iam", AccessMode::Readonly)
            .await
            .unwrap();
        assert_eq!(fetched.access, "ASIANEW");
        assert_eq!(fetched.readmode, AccessMode::Readonly);

        let loaded = cache.load_async("stack_iam", AccessMode::Readonly).await.unwrap();
        assert_eq!(loaded, fetched);
    }

    #[tokio::test]
    async fn test_fetch_miss_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let cache = CredentialCache::new(temp.path());

        let fetched = cache
            .fetch(&FixedMetadata(None), "stack_iam", AccessMode::Readonly)
            .await;
        assert!(fetched.is_none());
        assert!(cache.load("stack_iam", AccessMode::Readonly).is_none());
    }
}
