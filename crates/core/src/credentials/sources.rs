//! Individual credential sources
//!
//! Each source looks in exactly one place. A source that finds nothing, or
//! only half a key pair, returns `None`; the resolver then moves on to the next
//! one. Files that exist but cannot be read or parsed are logged and treated
//! the same way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::cache::CredentialCache;
use super::metadata::MetadataClient;
use super::resolver::CredentialPaths;
use super::{AccessMode, Credential, ResolveOptions};
use crate::env::Env;

/// Names the legacy conf file keys
const LEGACY_ACCESS_KEY: &str = "AMAZON_ACCESS_KEY_ID";
const LEGACY_SECRET_KEY: &str = "AMAZON_SECRET_ACCESS_KEY";

/// Everything a source may consult during one resolution
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub options: ResolveOptions,
    /// Environment (account) name from the options or `AWS_ACCOUNT`
    pub env_name: Option<String>,
    pub mode: AccessMode,
    pub env: Env,
    pub paths: CredentialPaths,
}

impl ResolveContext {
    fn env_name(&self) -> Option<&str> {
        self.env_name.as_deref()
    }
}

/// One place credentials may be found
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Look for a complete key pair, `None` on any miss
    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential>;
}

/// `-A`/`-S` on the command line
#[derive(Debug, Default)]
pub struct OptionsSource;

#[async_trait]
impl CredentialSource for OptionsSource {
    fn name(&self) -> &'static str {
        "options"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        let access = non_empty(ctx.options.access_key.as_deref())?;
        let secret = non_empty(ctx.options.secret_key.as_deref())?;
        Some(Credential::new(access, secret))
    }
}

#[derive(Debug, Default, Deserialize)]
struct EnvironmentYaml {
    access_key: Option<String>,
    secret_key: Option<String>,
    private_key: Option<PathBuf>,
    cert: Option<PathBuf>,
}

/// `<environment>.yml` under the system root, then the user root
#[derive(Debug, Default)]
pub struct EnvironmentYamlSource;

impl EnvironmentYamlSource {
    /// Every `*.yml` under the system root, then under the user root
    fn candidates(paths: &CredentialPaths) -> Vec<PathBuf> {
        [&paths.system_root, &paths.user_root]
            .into_iter()
            .filter_map(|root| {
                let pattern = root.join("*.yml");
                glob::glob(pattern.to_str()?).ok()
            })
            .flat_map(|entries| entries.flatten())
            .collect()
    }

    /// Parse every candidate file, keyed by file stem
    ///
    /// Files under the user root replace same-named files under the system
    /// root; entries are never merged field by field. An unreadable or
    /// malformed file still shadows the earlier one, so its environment is
    /// treated as absent.
    async fn discover(paths: &CredentialPaths) -> HashMap<String, EnvironmentYaml> {
        let roots = paths.clone();
        let candidates = tokio::task::spawn_blocking(move || Self::candidates(&roots))
            .await
            .unwrap_or_default();

        let mut configs = HashMap::new();
        for path in candidates {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let parsed = match read_optional(&path).await {
                Some(content) => match serde_yaml::from_str::<EnvironmentYaml>(&content) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping malformed environment file");
                        None
                    }
                },
                None => None,
            };

            match parsed {
                Some(parsed) => {
                    configs.insert(stem.to_string(), parsed);
                }
                None => {
                    configs.remove(stem);
                }
            }
        }
        configs
    }
}

#[async_trait]
impl CredentialSource for EnvironmentYamlSource {
    fn name(&self) -> &'static str {
        "environment yaml"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        let env_name = ctx.env_name()?;
        let mut configs = Self::discover(&ctx.paths).await;
        let Some(config) = configs.remove(env_name) else {
            tracing::debug!(env = env_name, "Environment not among the yaml files");
            return None;
        };

        let access = non_empty(config.access_key.as_deref())?;
        let secret = non_empty(config.secret_key.as_deref())?;

        let mut credential = Credential::new(access, secret).with_env(env_name);
        credential.privatekey = existing(config.private_key).await;
        credential.cert = existing(config.cert).await;
        Some(credential)
    }
}

/// Shell-style `aws-<environment>.conf` under `~/.aws` or `~/aws`
#[derive(Debug, Default)]
pub struct LegacyConfSource;

impl LegacyConfSource {
    async fn locate(home: &Path, env_name: &str) -> Option<PathBuf> {
        let file = format!("aws-{env_name}.conf");
        for path in [home.join(".aws").join(&file), home.join("aws").join(&file)] {
            if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                return Some(path);
            }
        }
        None
    }

    fn parse(content: &str) -> HashMap<String, String> {
        content
            .lines()
            .filter_map(|line| {
                let line = line.split('#').next().unwrap_or_default();
                let line = line
                    .replace("export ", "")
                    .replace(['\'', '"'], "");
                let (key, value) = line.trim().split_once('=')?;
                matches!(key, LEGACY_ACCESS_KEY | LEGACY_SECRET_KEY)
                    .then(|| (key.to_string(), value.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl CredentialSource for LegacyConfSource {
    fn name(&self) -> &'static str {
        "legacy conf"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        let env_name = ctx.env_name()?;
        let home = ctx.paths.home.as_deref()?;
        let path = Self::locate(home, env_name).await?;
        let conf = Self::parse(&read_optional(&path).await?);

        let access = non_empty(conf.get(LEGACY_ACCESS_KEY).map(String::as_str))?;
        let secret = non_empty(conf.get(LEGACY_SECRET_KEY).map(String::as_str))?;
        Some(Credential::new(access, secret).with_env(env_name))
    }
}

/// INI-style provider config named by `AWS_CONFIG_FILE`
#[derive(Debug, Default)]
pub struct ConfigFileSource;

impl ConfigFileSource {
    pub const PATH_VAR: &'static str = "AWS_CONFIG_FILE";

    /// Key/value pairs of the `[profile]` or `[profile <profile>]` section
    fn section(content: &str, profile: &str) -> HashMap<String, String> {
        let prefixed = format!("profile {profile}");
        let mut in_section = false;
        let mut values = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let header = header.trim();
                in_section = header == profile || header == prefixed;
                continue;
            }
            if !in_section {
                continue;
            }
            if let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        values
    }
}

#[async_trait]
impl CredentialSource for ConfigFileSource {
    fn name(&self) -> &'static str {
        "config file"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        let env_name = ctx.env_name()?;
        let path = ctx.env.get(Self::PATH_VAR)?;
        let section = Self::section(&read_optional(Path::new(&path)).await?, env_name);

        let access = non_empty(section.get("aws_access_key_id").map(String::as_str))?;
        let secret = non_empty(section.get("aws_secret_access_key").map(String::as_str))?;
        let token = ["sts_token", "aws_session_token"]
            .iter()
            .find_map(|k| non_empty(section.get(*k).map(String::as_str)));

        let mut credential = Credential::new(access, secret).with_env(env_name);
        credential.token = token.map(str::to_string);
        Some(credential)
    }
}

/// `AWSAccessKeyId=`/`AWSSecretKey=` file named by `AWS_CREDENTIAL_FILE`
#[derive(Debug, Default)]
pub struct CredentialFileSource;

impl CredentialFileSource {
    pub const PATH_VAR: &'static str = "AWS_CREDENTIAL_FILE";
}

#[async_trait]
impl CredentialSource for CredentialFileSource {
    fn name(&self) -> &'static str {
        "credential file"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        let path = ctx.env.get(Self::PATH_VAR)?;
        let content = read_optional(Path::new(&path)).await?;

        let mut access = None;
        let mut secret = None;
        for line in content.lines() {
            let (key, value) = line.split_once('=').unwrap_or((line, ""));
            match key.trim() {
                "AWSAccessKeyId" => access = Some(value.trim().to_string()),
                "AWSSecretKey" => secret = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let access = non_empty(access.as_deref())?;
        let secret = non_empty(secret.as_deref())?;
        Some(Credential::new(access, secret))
    }
}

/// Key variables in the process environment
#[derive(Debug, Default)]
pub struct EnvironmentSource;

impl EnvironmentSource {
    /// Current name first, legacy names after
    pub const ACCESS_VARS: [&'static str; 3] =
        ["AWS_ACCESS_KEY", "AMAZON_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"];
    pub const SECRET_VARS: [&'static str; 3] = [
        "AWS_SECRET_KEY",
        "AMAZON_SECRET_ACCESS_KEY",
        "AWS_SECRET_ACCESS_KEY",
    ];
}

#[async_trait]
impl CredentialSource for EnvironmentSource {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        if ctx.options.force_file {
            return None;
        }

        let access = ctx.env.first_of(&Self::ACCESS_VARS)?;
        let secret = ctx.env.first_of(&Self::SECRET_VARS)?;

        let mut credential = Credential::new(access, secret);
        credential.token = ctx.env.get(super::SESSION_TOKEN_VAR);
        credential.privatekey = existing(ctx.env.get("EC2_PRIVATE_KEY").map(PathBuf::from)).await;
        credential.cert = existing(ctx.env.get("EC2_CERT").map(PathBuf::from)).await;
        Some(credential)
    }
}

/// Cached or freshly fetched instance role credentials for the environment
pub struct InstanceMetadataSource {
    client: Arc<dyn MetadataClient>,
}

impl InstanceMetadataSource {
    pub fn new(client: Arc<dyn MetadataClient>) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for InstanceMetadataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceMetadataSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialSource for InstanceMetadataSource {
    fn name(&self) -> &'static str {
        "instance metadata"
    }

    async fn lookup(&self, ctx: &ResolveContext) -> Option<Credential> {
        if ctx.options.force_file {
            return None;
        }
        let account = ctx.env_name()?;
        let cache = CredentialCache::new(&ctx.paths.cache_root);

        let entry = match cache.load_async(account, ctx.mode).await {
            Some(entry) if cache.is_valid(&entry) => entry,
            _ => cache.fetch(self.client.as_ref(), account, ctx.mode).await?,
        };
        Some(entry.to_credential())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn existing(path: Option<PathBuf>) -> Option<PathBuf> {
    let path = path?;
    tokio::fs::try_exists(&path)
        .await
        .unwrap_or(false)
        .then_some(path)
}

/// Read a file that may legitimately be absent
async fn read_optional(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable credential file");
            None
        }
    }
}
