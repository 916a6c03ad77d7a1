//! Configuration types shared across crates.

use crate::archive::validate_part_size;
use crate::vault::{DEFAULT_ACCOUNT_ID, Vault, validate_vault_name};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Region used for the endpoint and request signing.
    #[serde(default = "default_region")]
    pub region: String,
    /// Endpoint override (e.g., "http://localhost:9000"). Derived from the region if unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
    /// WARNING: Prefer env vars over storing secrets in config files.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Session token for temporary credentials.
    #[serde(default)]
    pub session_token: Option<String>,
    /// Default vault name.
    #[serde(default)]
    pub vault: Option<String>,
    /// Account owning the vault ("-" for the signing account).
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upload tuning.
    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_account_id() -> String {
    DEFAULT_ACCOUNT_ID.to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            vault: None,
            account_id: default_account_id(),
            request_timeout_secs: default_request_timeout_secs(),
            upload: UploadConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.region.trim().is_empty() {
            return Err("region must not be empty".to_string());
        }
        match (self.access_key_id.as_ref(), self.secret_access_key.as_ref()) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => {
                return Err(
                    "access_key_id and secret_access_key must be set together".to_string(),
                );
            }
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }
        if let Some(vault) = &self.vault {
            validate_vault_name(vault).map_err(|e| e.to_string())?;
        }
        self.upload.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the vault to operate on, preferring `name` over the configured default.
    pub fn vault(&self, name: Option<&str>) -> crate::Result<Vault> {
        let name = name.or(self.vault.as_deref()).ok_or_else(|| {
            crate::Error::InvalidVaultName("no vault given and none configured".to_string())
        })?;
        Vault::with_account(self.account_id.clone(), name)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("vault", &self.vault)
            .field("account_id", &self.account_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("upload", &self.upload)
            .finish()
    }
}

/// Upload tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Part size in bytes for multipart uploads.
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    /// Files larger than this are uploaded in parts.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
    /// Maximum parts in flight at once.
    #[serde(default = "default_max_parallel_parts")]
    pub max_parallel_parts: usize,
}

fn default_part_size() -> u64 {
    crate::DEFAULT_PART_SIZE
}

fn default_multipart_threshold() -> u64 {
    100 * 1024 * 1024
}

fn default_max_parallel_parts() -> usize {
    4
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            multipart_threshold: default_multipart_threshold(),
            max_parallel_parts: default_max_parallel_parts(),
        }
    }
}

impl UploadConfig {
    /// Validate upload tuning.
    pub fn validate(&self) -> Result<(), String> {
        validate_part_size(self.part_size).map_err(|e| e.to_string())?;
        if self.max_parallel_parts == 0 {
            return Err("max_parallel_parts must be at least 1".to_string());
        }
        Ok(())
    }
}
