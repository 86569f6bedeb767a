//! Process exit codes
//!
//! Scripts wrapping kaws rely on these values; do not renumber them.

use kaws_core::Error;

/// Exit status of a kaws invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    /// Unclassified failure, including partially failed bulk operations
    GeneralError = 1,
    /// Bad arguments or configuration
    UsageError = 2,
    /// Transport or provider failure after retries
    NetworkError = 3,
    /// No credentials found, or the provider rejected them
    AuthError = 4,
    NotFound = 5,
    /// Transferred data failed verification
    IntegrityError = 6,
}

impl From<&Error> for ExitCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::Config(_) | Error::Toml { .. } => ExitCode::UsageError,
            Error::Network(_) | Error::RetryExhausted { .. } | Error::Copy { .. } => {
                ExitCode::NetworkError
            }
            Error::Auth(_) | Error::CredentialsNotFound => ExitCode::AuthError,
            Error::NotFound(_) => ExitCode::NotFound,
            Error::Integrity { .. } => ExitCode::IntegrityError,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
