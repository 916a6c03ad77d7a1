//! Request signing for archival vault requests.
//!
//! This crate provides:
//! - Credential loading and redaction
//! - AWS Signature Version 4 header signing

pub mod credentials;
pub mod error;
pub mod signer;

pub use credentials::Credentials;
pub use error::{SignerError, SignerResult};
pub use signer::{SigV4Signer, SignableRequest};
