//! Credential types, resolution, and caching
//!
//! [`CredentialResolver`] walks a fixed chain of [`CredentialSource`]s and
//! returns the first complete key pair. Temporary credentials from the
//! instance metadata service are cached on disk by [`CredentialCache`].
//!
//! Resolution itself never touches the process environment. Callers that
//! launch provider tooling as subprocesses call [`publish_to_environment`]
//! explicitly.

mod cache;
mod metadata;
mod resolver;
mod sources;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use cache::{CacheEntry, CredentialCache};
pub use metadata::{ImdsClient, MetadataClient, MetadataCredentials};
pub use resolver::{CredentialPaths, CredentialResolver};
pub use sources::{
    ConfigFileSource, CredentialFileSource, CredentialSource, EnvironmentSource,
    EnvironmentYamlSource, InstanceMetadataSource, LegacyConfSource, OptionsSource,
    ResolveContext,
};

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Variables written by [`publish_to_environment`]
pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";

/// Whether a key is meant for read-only or read-write access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Readonly,
    Readwrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Readonly => write!(f, "readonly"),
            AccessMode::Readwrite => write!(f, "readwrite"),
        }
    }
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "readonly" | "ro" => Ok(AccessMode::Readonly),
            "readwrite" | "rw" => Ok(AccessMode::Readwrite),
            _ => Err(format!("Invalid access mode: {s}")),
        }
    }
}

/// An access/secret key pair and everything known about where it came from
///
/// The all-empty value ([`Credential::ambient`]) means "let the ambient
/// instance identity authenticate".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access: String,
    pub secret: String,
    pub token: Option<String>,
    pub mode: Option<AccessMode>,
    /// Environment name the key was found under
    pub env: Option<String>,
    pub privatekey: Option<PathBuf>,
    pub cert: Option<PathBuf>,
}

impl Credential {
    /// A plain key pair
    pub fn new(access: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// The empty credential deferring to the instance identity
    pub fn ambient() -> Self {
        Self::default()
    }

    /// True for the empty credential
    pub fn is_ambient(&self) -> bool {
        self.access.is_empty() && self.secret.is_empty() && self.token.is_none()
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Access key with everything but the first four characters masked
    pub fn masked_access(&self) -> String {
        mask(&self.access, 4)
    }

    /// Variable assignments matching [`publish_to_environment`]
    ///
    /// A `None` value means the variable should be removed.
    pub fn environment_vars(&self) -> Vec<(&'static str, Option<String>)> {
        if self.is_ambient() {
            return Vec::new();
        }
        vec![
            (ACCESS_KEY_VAR, Some(self.access.clone())),
            (SECRET_KEY_VAR, Some(self.secret.clone())),
            (SESSION_TOKEN_VAR, self.token.clone()),
        ]
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access", &self.access)
            .field("secret", &"** redacted **")
            .field("token", &self.token.as_ref().map(|_| "** redacted **"))
            .field("mode", &self.mode)
            .field("env", &self.env)
            .field("privatekey", &self.privatekey)
            .field("cert", &self.cert)
            .finish()
    }
}

fn mask(value: &str, visible: usize) -> String {
    let shown: String = value.chars().take(visible).collect();
    let hidden = value.chars().count().saturating_sub(visible);
    format!("{shown}{}", "*".repeat(hidden))
}

/// A credential bound to a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCredential {
    pub region: String,
    pub credential: Credential,
}

impl RegionCredential {
    /// Pair `credential` with `region`, or the default region when `None`
    pub fn new(region: Option<&str>, credential: Credential) -> Self {
        Self {
            region: region.unwrap_or(DEFAULT_REGION).to_string(),
            credential,
        }
    }
}

/// What a service `connect()` accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Global endpoint, SDK default region
    Global(Credential),
    /// Region-scoped endpoint
    Regional(RegionCredential),
}

impl Credentials {
    pub fn credential(&self) -> &Credential {
        match self {
            Credentials::Global(credential) => credential,
            Credentials::Regional(regional) => &regional.credential,
        }
    }

    pub fn region(&self) -> Option<&str> {
        match self {
            Credentials::Global(_) => None,
            Credentials::Regional(regional) => Some(&regional.region),
        }
    }
}

impl From<Credential> for Credentials {
    fn from(credential: Credential) -> Self {
        Credentials::Global(credential)
    }
}

impl From<RegionCredential> for Credentials {
    fn from(regional: RegionCredential) -> Self {
        Credentials::Regional(regional)
    }
}

/// Caller-supplied inputs to credential resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Named environment (account) to look up
    pub env: Option<String>,
    pub readwrite: bool,
    /// Only consult credential files: skip process environment and metadata
    pub force_file: bool,
    /// Use the instance identity when no environment is named
    pub force_instance_identity: bool,
    pub region: Option<String>,
}

/// Export `credential` into the process environment for subprocess tooling
///
/// Sets the access and secret key variables and sets or removes the session
/// token variable. The ambient credential publishes nothing, so that SDKs
/// keep falling back to the instance identity.
///
/// This mutates global process state. Call it before starting any threads
/// (including an async runtime); to hand credentials to a child process use
/// [`Credential::environment_vars`] with `Command::envs` instead.
pub fn publish_to_environment(credential: &Credential) {
    for (name, value) in credential.environment_vars() {
        // SAFETY: the caller guarantees no other thread is reading or writing
        // the environment.
        unsafe {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
    tracing::debug!(
        access = %credential.masked_access(),
        token = credential.token.is_some(),
        "Published credentials to environment"
    );
}
