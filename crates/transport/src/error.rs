//! Transport error types.

use thiserror::Error;

/// Errors raised before a response is received.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("invalid header {0}")]
    InvalidHeader(String),

    #[error("signing error: {0}")]
    Signing(#[from] frostvault_signer::SignerError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<TransportError> for frostvault_core::Error {
    fn from(err: TransportError) -> Self {
        frostvault_core::Error::Transport(Box::new(err))
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
