//! Signer error types.

use thiserror::Error;

/// Signing operation errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("header {0} must be present to sign the request")]
    MissingHeader(String),

    #[error("time formatting error: {0}")]
    Time(#[from] time::error::Format),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
