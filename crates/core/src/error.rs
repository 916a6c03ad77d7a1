//! Error types for the archive engine.

use crate::transport::Response;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`Error`], used by callers to pick a retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local file missing, truncated or unreadable.
    Io,
    /// Part index out of bounds.
    Range,
    /// The store answered with an unexpected status or a malformed body.
    Protocol,
    /// Operation invoked from an invalid upload state.
    State,
    /// Invalid caller-supplied value (part size, vault name, description).
    Config,
    /// The transport failed before a response was received.
    Transport,
}

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read from {} at offset {offset}: expected {expected} bytes, got {actual}", .path.display())]
    ShortRead {
        path: PathBuf,
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("part index {index} out of range (archive has {part_count} parts)")]
    PartOutOfRange { index: u64, part_count: u64 },

    #[error("{operation} failed: expected status {expected}, got {}: {}", .response.status, .response.body_text())]
    UnexpectedStatus {
        operation: &'static str,
        expected: u16,
        response: Box<Response>,
    },

    #[error("{operation} response is missing the {header} header")]
    MissingHeader {
        operation: &'static str,
        header: &'static str,
        response: Box<Response>,
    },

    #[error("malformed {operation} response: {message}")]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },

    #[error("cannot {operation} while upload is {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::upload::UploadState,
    },

    #[error("cannot complete upload: {} of {part_count} parts not acknowledged (first missing: {})", .missing.len(), .missing.first().copied().unwrap_or_default())]
    MissingParts { missing: Vec<u64>, part_count: u64 },

    #[error("upload session error: {0}")]
    UploadSession(String),

    #[error("invalid part size: {size} (must be a power-of-two multiple of {min} up to {max})")]
    InvalidPartSize { size: u64, min: u64, max: u64 },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid content range: {0}")]
    InvalidContentRange(String),

    #[error("invalid vault name: {0}")]
    InvalidVaultName(String),

    #[error("invalid archive description: {0}")]
    InvalidDescription(String),

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } | Self::Io(_) | Self::ShortRead { .. } => ErrorKind::Io,
            Self::PartOutOfRange { .. } => ErrorKind::Range,
            Self::UnexpectedStatus { .. }
            | Self::MissingHeader { .. }
            | Self::MalformedResponse { .. } => ErrorKind::Protocol,
            Self::InvalidState { .. } | Self::MissingParts { .. } | Self::UploadSession(_) => {
                ErrorKind::State
            }
            Self::InvalidPartSize { .. }
            | Self::InvalidHash(_)
            | Self::InvalidContentRange(_)
            | Self::InvalidVaultName(_)
            | Self::InvalidDescription(_) => ErrorKind::Config,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// The response attached to a protocol error, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::UnexpectedStatus { response, .. } | Self::MissingHeader { response, .. } => {
                Some(response.as_ref())
            }
            _ => None,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
