//! Listing uploaded parts and in-progress multipart uploads.

use crate::Error;
use crate::transport::{Method, Request, Transport, status};
use crate::upload::{UploadId, expect_status};
use crate::vault::Vault;
use serde::Deserialize;

/// One page of a part listing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartList {
    #[serde(default)]
    pub archive_description: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    /// Continuation marker; `None` on the last page.
    #[serde(default)]
    pub marker: Option<String>,
    pub multipart_upload_id: UploadId,
    pub part_size_in_bytes: u64,
    #[serde(default)]
    pub parts: Vec<PartListEntry>,
    #[serde(rename = "VaultARN", default)]
    pub vault_arn: Option<String>,
}

/// A part the store holds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PartListEntry {
    /// `{start}-{end}` with an inclusive end.
    #[serde(rename = "RangeInBytes")]
    pub range_in_bytes: String,
    #[serde(rename = "SHA256TreeHash")]
    pub sha256_tree_hash: String,
}

/// One page of the in-progress upload listing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultipartUploadList {
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub uploads_list: Vec<UploadListEntry>,
}

/// An in-progress upload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadListEntry {
    #[serde(default)]
    pub archive_description: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    pub multipart_upload_id: UploadId,
    pub part_size_in_bytes: u64,
    #[serde(rename = "VaultARN", default)]
    pub vault_arn: Option<String>,
}

/// Fetch one page of parts, starting at `marker`.
pub async fn list_parts(
    transport: &dyn Transport,
    vault: &Vault,
    upload_id: &UploadId,
    marker: Option<&str>,
) -> crate::Result<PartList> {
    const OPERATION: &str = "list parts";

    let mut request = Request::new(Method::Get, vault.upload_path(upload_id));
    if let Some(marker) = marker {
        request = request.query("marker", marker);
    }
    let response = transport.send(request).await?;
    let response = expect_status(OPERATION, status::OK, response)?;
    decode(OPERATION, &response.body)
}

/// Fetch every part, following markers until the last page.
pub async fn list_all_parts(
    transport: &dyn Transport,
    vault: &Vault,
    upload_id: &UploadId,
) -> crate::Result<Vec<PartListEntry>> {
    let mut parts = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let page = list_parts(transport, vault, upload_id, marker.as_deref()).await?;
        parts.extend(page.parts);
        match page.marker.filter(|m| !m.is_empty()) {
            Some(next) => marker = Some(next),
            None => break,
        }
    }
    tracing::debug!(upload_id = %upload_id, parts = parts.len(), "listed parts");
    Ok(parts)
}

/// Fetch one page of in-progress uploads, starting at `marker`.
pub async fn list_multipart_uploads(
    transport: &dyn Transport,
    vault: &Vault,
    marker: Option<&str>,
) -> crate::Result<MultipartUploadList> {
    const OPERATION: &str = "list multipart uploads";

    let mut request = Request::new(Method::Get, vault.multipart_uploads_path());
    if let Some(marker) = marker {
        request = request.query("marker", marker);
    }
    let response = transport.send(request).await?;
    let response = expect_status(OPERATION, status::OK, response)?;
    decode(OPERATION, &response.body)
}

/// Fetch every in-progress upload of `vault`.
pub async fn list_all_multipart_uploads(
    transport: &dyn Transport,
    vault: &Vault,
) -> crate::Result<Vec<UploadListEntry>> {
    let mut uploads = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let page = list_multipart_uploads(transport, vault, marker.as_deref()).await?;
        uploads.extend(page.uploads_list);
        match page.marker.filter(|m| !m.is_empty()) {
            Some(next) => marker = Some(next),
            None => break,
        }
    }
    Ok(uploads)
}

fn decode<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    body: &[u8],
) -> crate::Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::MalformedResponse {
        operation,
        message: e.to_string(),
    })
}
