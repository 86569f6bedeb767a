//! Error types for kaws-core
//!
//! A single error enum shared by the credential resolver, the paginator and
//! the transfer engine. Source misses during credential resolution are not
//! errors and never show up here.

use std::path::PathBuf;

/// Result alias used throughout kaws-core
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by kaws-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport or provider-side failure (timeouts, 5xx, throttling)
    #[error("Network error: {0}")]
    Network(String),

    /// Provider rejected the credentials or the operation
    #[error("Access denied: {0}")]
    Auth(String),

    /// Bucket or key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration or arguments
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML (de)serialization failure
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse failure in the kaws config file
    #[error("Failed to parse {path}: {message}")]
    Toml { path: PathBuf, message: String },

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every credential source was tried and none produced a key pair
    #[error("Unable to determine credentials")]
    CredentialsNotFound,

    /// A retried operation used up its attempt budget
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<Error> },

    /// A multipart copy part could not be copied
    ///
    /// The multipart upload identified by `upload_id` is left open so the
    /// caller can abort it.
    #[error("Couldn't copy part {part} of {key} - tried {attempts} times: {message}")]
    Copy {
        key: String,
        upload_id: String,
        part: u32,
        attempts: u32,
        message: String,
    },

    /// Local and remote data disagree after a transfer
    #[error("Data integrity could not be confirmed for {key}: local {local}, remote {remote}")]
    Integrity {
        key: String,
        local: String,
        remote: String,
    },

    /// Anything else
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Number of attempts recorded on the error, if it came out of a retry loop
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::RetryExhausted { attempts, .. } | Error::Copy { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_display() {
        let err = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::Network("503 Service Unavailable".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Gave up after 3 attempts: Network error: 503 Service Unavailable"
        );
        assert_eq!(err.attempts(), Some(3));
    }

    #[test]
    fn test_copy_error_display() {
        let err = Error::Copy {
            key: "logs/big.bin".to_string(),
            upload_id: "upload-1".to_string(),
            part: 2,
            attempts: 2,
            message: "slow down".to_string(),
        };
        assert!(err.to_string().contains("part 2 of logs/big.bin"));
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(Error::NotFound("x".to_string()).attempts(), None);
    }
}
