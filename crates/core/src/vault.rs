//! Vault addressing and request path construction.

use crate::upload::UploadId;
use crate::{Error, MAX_DESCRIPTION_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account id placeholder meaning "the account that signs the request".
pub const DEFAULT_ACCOUNT_ID: &str = "-";

const MAX_VAULT_NAME_LEN: usize = 255;

/// A vault within an account.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vault {
    account_id: String,
    name: String,
}

impl Vault {
    /// A vault of the signing account.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        Self::with_account(DEFAULT_ACCOUNT_ID, name)
    }

    /// A vault of an explicit account.
    pub fn with_account(
        account_id: impl Into<String>,
        name: impl Into<String>,
    ) -> crate::Result<Self> {
        let name = name.into();
        validate_vault_name(&name)?;
        let account_id = account_id.into();
        if account_id != DEFAULT_ACCOUNT_ID
            && (account_id.is_empty() || !account_id.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(Error::InvalidVaultName(format!(
                "account id must be '-' or digits, got {account_id:?}"
            )));
        }
        Ok(Self { account_id, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Path of the vault itself.
    pub fn path(&self) -> String {
        format!("/{}/vaults/{}", self.account_id, self.name)
    }

    /// Path single-shot uploads are posted to.
    pub fn archives_path(&self) -> String {
        format!("{}/archives", self.path())
    }

    /// Path multipart uploads are initiated and listed on.
    pub fn multipart_uploads_path(&self) -> String {
        format!("{}/multipart-uploads", self.path())
    }

    /// Path of one multipart upload.
    pub fn upload_path(&self, upload_id: &UploadId) -> String {
        format!("{}/multipart-uploads/{}", self.path(), upload_id)
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vault({}/{})", self.account_id, self.name)
    }
}

impl fmt::Display for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Vault names are 1-255 characters of `[A-Za-z0-9_.-]`.
pub fn validate_vault_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.len() > MAX_VAULT_NAME_LEN {
        return Err(Error::InvalidVaultName(format!(
            "length must be 1-{MAX_VAULT_NAME_LEN}, got {}",
            name.len()
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(Error::InvalidVaultName(format!(
            "{name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Archive descriptions are at most 1024 printable ASCII characters.
pub fn validate_description(description: &str) -> crate::Result<()> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(Error::InvalidDescription(format!(
            "at most {MAX_DESCRIPTION_LEN} characters allowed, got {}",
            description.len()
        )));
    }
    if let Some(bad) = description.chars().find(|c| !(' '..='~').contains(c)) {
        return Err(Error::InvalidDescription(format!(
            "invalid character {bad:?}"
        )));
    }
    Ok(())
}
