//! Credential resolution chain

use std::path::PathBuf;
use std::sync::Arc;

use super::metadata::{ImdsClient, MetadataClient};
use super::sources::{
    ConfigFileSource, CredentialFileSource, CredentialSource, EnvironmentSource,
    EnvironmentYamlSource, InstanceMetadataSource, LegacyConfSource, OptionsSource,
    ResolveContext,
};
use super::{AccessMode, Credential, RegionCredential, ResolveOptions};
use crate::config::PathsConfig;
use crate::env::Env;
use crate::error::{Error, Result};

/// Variable naming the environment when none is passed explicitly
pub const ACCOUNT_VAR: &str = "AWS_ACCOUNT";

/// Variable overriding the default (read-only) access mode
pub const READMODE_VAR: &str = "AWS_READMODE";

/// Filesystem locations consulted during resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPaths {
    /// System-wide `<environment>.yml` directory
    pub system_root: PathBuf,
    /// Per-user `<environment>.yml` directory
    pub user_root: PathBuf,
    /// Home directory for the legacy conf files
    pub home: Option<PathBuf>,
    /// Root of the instance metadata credential cache
    pub cache_root: PathBuf,
}

impl CredentialPaths {
    /// Paths with the cache stored under the user root
    pub fn new(system_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        let user_root = user_root.into();
        Self {
            system_root: system_root.into(),
            cache_root: user_root.clone(),
            user_root,
            home: dirs::home_dir(),
        }
    }

    /// Paths from the `[paths]` config section; the user root defaults to `~/.kaws`
    pub fn from_config(config: &PathsConfig) -> Result<Self> {
        let user_root = match &config.user_root {
            Some(root) => root.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?
                .join(".kaws"),
        };
        Ok(Self::new(&config.system_root, user_root))
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }
}

/// Runs credential sources in precedence order
///
/// The first source returning a complete key pair wins. Sources after it are
/// never consulted and results are never merged.
pub struct CredentialResolver {
    env: Env,
    paths: CredentialPaths,
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialResolver {
    /// The standard chain, ending with the instance metadata service
    pub fn new(env: Env, paths: CredentialPaths) -> Result<Self> {
        Ok(Self::with_metadata_client(
            env,
            paths,
            Arc::new(ImdsClient::new()?),
        ))
    }

    /// The standard chain using `client` for instance metadata
    pub fn with_metadata_client(
        env: Env,
        paths: CredentialPaths,
        client: Arc<dyn MetadataClient>,
    ) -> Self {
        let mut sources = Self::file_and_env_sources();
        sources.push(Box::new(InstanceMetadataSource::new(client)));
        Self::from_sources(env, paths, sources)
    }

    /// The standard chain without the instance metadata service
    pub fn offline(env: Env, paths: CredentialPaths) -> Self {
        Self::from_sources(env, paths, Self::file_and_env_sources())
    }

    /// A custom chain, consulted in the given order
    pub fn from_sources(
        env: Env,
        paths: CredentialPaths,
        sources: Vec<Box<dyn CredentialSource>>,
    ) -> Self {
        Self {
            env,
            paths,
            sources,
        }
    }

    fn file_and_env_sources() -> Vec<Box<dyn CredentialSource>> {
        vec![
            Box::new(OptionsSource),
            Box::new(EnvironmentYamlSource),
            Box::new(LegacyConfSource),
            Box::new(ConfigFileSource),
            Box::new(CredentialFileSource),
            Box::new(EnvironmentSource),
        ]
    }

    /// Source names in consultation order
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Environment name from the options, else `AWS_ACCOUNT`
    pub fn env_name(&self, options: &ResolveOptions) -> Option<String> {
        options
            .env
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .or_else(|| self.env.get(ACCOUNT_VAR))
    }

    /// Read-only unless `AWS_READMODE` says otherwise; `--rw` always wins
    pub fn access_mode(&self, options: &ResolveOptions) -> AccessMode {
        if options.readwrite {
            return AccessMode::Readwrite;
        }
        match self.env.get(READMODE_VAR) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring {READMODE_VAR}");
                AccessMode::default()
            }),
            None => AccessMode::default(),
        }
    }

    /// Find a credential for `options`
    ///
    /// Without an environment name, `force_instance_identity` yields the
    /// ambient credential without consulting any source.
    pub async fn resolve(&self, options: &ResolveOptions) -> Result<Credential> {
        let env_name = self.env_name(options);
        if env_name.is_none() && options.force_instance_identity {
            tracing::info!("No environment named, deferring to instance identity");
            return Ok(Credential::ambient());
        }

        let mode = self.access_mode(options);
        let ctx = ResolveContext {
            options: options.clone(),
            env_name,
            mode,
            env: self.env.clone(),
            paths: self.paths.clone(),
        };

        for source in &self.sources {
            let Some(mut credential) = source.lookup(&ctx).await else {
                tracing::debug!(source = source.name(), "No credentials");
                continue;
            };

            credential.mode.get_or_insert(mode);
            tracing::info!(
                source = source.name(),
                access = %credential.masked_access(),
                mode = %mode,
                "Resolved credentials"
            );
            return Ok(credential);
        }

        Err(Error::CredentialsNotFound)
    }

    /// [`resolve`](Self::resolve) and pair the result with the requested region
    pub async fn resolve_region(&self, options: &ResolveOptions) -> Result<RegionCredential> {
        let credential = self.resolve(options).await?;
        Ok(RegionCredential::new(options.region.as_deref(), credential))
    }
}
