//! Credential flags shared by every command that talks to AWS

use std::sync::Arc;

use clap::Args;
use kaws_core::{
    Config, CredentialPaths, CredentialResolver, Credentials, Env, ObjectStore, RegionCredential,
    ResolveOptions,
};

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Where to find credentials
#[derive(Args, Debug, Clone, Default)]
pub struct AwsArgs {
    /// Access key (overrides every other credential source)
    #[arg(short = 'A', long)]
    pub access_key: Option<String>,

    /// Secret key, used with --access-key
    #[arg(short = 'S', long)]
    pub secret_key: Option<String>,

    /// Named environment to load credentials for (defaults to AWS_ACCOUNT)
    #[arg(short = 'e', long)]
    pub env: Option<String>,

    /// Use a read-write key (default: read-only)
    #[arg(long)]
    pub rw: bool,

    /// Use the instance identity when no environment is named
    #[arg(long = "iam", visible_alias = "forceiam")]
    pub force_iam: bool,

    /// Only read credential files, never the process environment or instance metadata
    #[arg(long = "file", visible_alias = "forcefile")]
    pub force_file: bool,

    /// Region (defaults to the configured region)
    #[arg(short = 'r', long)]
    pub region: Option<String>,
}

impl AwsArgs {
    /// Resolver inputs; `config` supplies the region when none was given
    pub fn resolve_options(&self, config: &Config) -> ResolveOptions {
        ResolveOptions {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            env: self.env.clone(),
            readwrite: self.rw,
            force_file: self.force_file,
            force_instance_identity: self.force_iam,
            region: Some(self.region.clone().unwrap_or_else(|| config.region.clone())),
        }
    }

    /// Resolve credentials, reporting failures through `formatter`
    pub async fn resolve(
        &self,
        config: &Config,
        formatter: &Formatter,
    ) -> Result<RegionCredential, ExitCode> {
        let paths = match CredentialPaths::from_config(&config.paths) {
            Ok(paths) => paths,
            Err(e) => {
                formatter.error(&format!("Invalid credential paths: {e}"));
                return Err(ExitCode::UsageError);
            }
        };

        let resolver = match CredentialResolver::new(Env::real(), paths) {
            Ok(resolver) => resolver,
            Err(e) => {
                formatter.error(&format!("Failed to set up credential resolver: {e}"));
                return Err(ExitCode::from(&e));
            }
        };
        match resolver.resolve_region(&self.resolve_options(config)).await {
            Ok(resolved) => {
                tracing::debug!(
                    region = %resolved.region,
                    env = resolved.credential.env.as_deref().unwrap_or_default(),
                    ambient = resolved.credential.is_ambient(),
                    "Resolved credentials"
                );
                Ok(resolved)
            }
            Err(e) => {
                formatter.error(&format!("Failed to resolve credentials: {e}"));
                Err(ExitCode::from(&e))
            }
        }
    }

    /// Resolve credentials and open an S3 connection with them
    pub async fn connect(
        &self,
        config: &Config,
        formatter: &Formatter,
    ) -> Result<Arc<dyn ObjectStore>, ExitCode> {
        let credentials = Credentials::from(self.resolve(config, formatter).await?);
        match kaws_s3::connect(&credentials).await {
            Ok(store) => Ok(store),
            Err(e) => {
                formatter.error(&format!("Failed to create S3 client: {e}"));
                Err(ExitCode::NetworkError)
            }
        }
    }
}
