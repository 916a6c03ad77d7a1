//! Session files that let an interrupted multipart upload continue in a later run.

use anyhow::{Context, Result};
use frostvault_core::{UploadSession, Vault};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SESSION_SUFFIX: &str = ".frostvault-session.json";

/// What gets written to disk: the upload session plus the vault it targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFile {
    pub account_id: String,
    pub vault: String,
    #[serde(flatten)]
    pub upload: UploadSession,
}

impl SessionFile {
    pub fn new(vault: &Vault, upload: UploadSession) -> Self {
        Self {
            account_id: vault.account_id().to_string(),
            vault: vault.name().to_string(),
            upload,
        }
    }

    pub fn vault(&self) -> frostvault_core::Result<Vault> {
        Vault::with_account(self.account_id.clone(), self.vault.clone())
    }
}

/// `<file>.frostvault-session.json` next to the archive.
pub fn default_path(archive: &Path) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(SESSION_SUFFIX);
    archive.with_file_name(name)
}

pub async fn load(path: &Path) -> Result<SessionFile> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read session file {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse session file {}", path.display()))
}

/// Write the session atomically with owner-only permissions.
///
/// Synchronous so it can run from the per-part progress callback.
pub fn save(path: &Path, session: &SessionFile) -> Result<()> {
    let contents = serde_json::to_vec_pretty(session)?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write session file {}", tmp.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move session file into {}", path.display()))?;
    Ok(())
}

/// Delete the session file; a file that is already gone is fine.
pub async fn remove(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
