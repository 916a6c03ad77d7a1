//! Upload lifecycle: single-shot uploads and the multipart state machine.
//!
//! A multipart upload moves `NotStarted -> InProgress -> Completed`, or to
//! `Aborted` from either of the first two states. Hashing is delegated to
//! [`LocalArchive`] and all network I/O goes through a [`Transport`].

use crate::archive::{ArchiveId, LocalArchive, PartPayload};
use crate::chunk::TreeHash;
use crate::config::UploadConfig;
use crate::listing;
use crate::range::{ContentRange, PartRange};
use crate::transport::{
    ARCHIVE_ID_HEADER, ARCHIVE_SIZE_HEADER, CONTENT_HASH_HEADER, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, DESCRIPTION_HEADER, Method, OCTET_STREAM, PART_SIZE_HEADER, Request, Response,
    TREE_HASH_HEADER, Transport, UPLOAD_ID_HEADER, status,
};
use crate::vault::{Vault, validate_description};
use crate::{Error, MAX_SINGLE_UPLOAD_SIZE};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opaque id the store assigns to a multipart upload.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Multipart upload state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// No upload has been initiated by this coordinator.
    NotStarted,
    /// An upload id exists and parts are being accepted.
    InProgress,
    /// The store assembled the archive.
    Completed,
    /// The upload was deleted.
    Aborted,
}

impl UploadState {
    /// Check if the upload can still accept parts.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Check if the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        })
    }
}

/// Everything needed to continue a multipart upload from another process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// The file being uploaded.
    pub path: PathBuf,
    /// File size when the upload started.
    pub size: u64,
    /// Part size the upload was initiated with.
    pub part_size: u64,
    /// Store-issued upload id.
    pub upload_id: UploadId,
    /// Part indices the store has acknowledged.
    #[serde(default)]
    pub acknowledged: BTreeSet<u64>,
}

impl UploadSession {
    /// Calculate the expected number of parts.
    pub fn part_count(&self) -> u64 {
        self.size.div_ceil(self.part_size)
    }

    /// Part indices not yet acknowledged, in order.
    pub fn missing_parts(&self) -> Vec<u64> {
        (0..self.part_count())
            .filter(|p| !self.acknowledged.contains(p))
            .collect()
    }

    /// Whether every part has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.missing_parts().is_empty()
    }
}

/// Outcome of one part upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartReceipt {
    pub range: PartRange,
    pub tree_hash: TreeHash,
    /// False when the store accepted the part after the upload was aborted
    /// or completed; such results are dropped.
    pub recorded: bool,
}

/// How a file should be sent to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStrategy {
    SinglePart,
    Multipart,
}

impl UploadStrategy {
    /// Single-shot at or below the configured threshold, multipart above it.
    pub fn choose(size: u64, config: &UploadConfig) -> Self {
        if size <= config.multipart_threshold && size <= MAX_SINGLE_UPLOAD_SIZE {
            Self::SinglePart
        } else {
            Self::Multipart
        }
    }
}

/// Upload a whole file in one request.
pub async fn upload_archive(
    transport: &dyn Transport,
    vault: &Vault,
    archive: &mut LocalArchive,
    description: Option<&str>,
) -> crate::Result<ArchiveId> {
    const OPERATION: &str = "upload archive";

    if let Some(description) = description {
        validate_description(description)?;
    }
    if archive.size() > MAX_SINGLE_UPLOAD_SIZE {
        return Err(Error::UploadSession(format!(
            "{} bytes exceeds the single-request limit of {MAX_SINGLE_UPLOAD_SIZE} bytes",
            archive.size()
        )));
    }

    let payload = archive.read_all().await?;
    let mut request = Request::new(Method::Post, vault.archives_path())
        .header(CONTENT_LENGTH, payload.bytes.len().to_string())
        .header(TREE_HASH_HEADER, payload.tree_hash.to_hex())
        .signed_header(CONTENT_HASH_HEADER, payload.content_hash.to_hex());
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        request = request.header(DESCRIPTION_HEADER, description);
    }
    let request = request.body(payload.bytes);

    tracing::debug!(vault = %vault, size = archive.size(), "sending single-shot upload");
    let response = transport.send(request).await?;
    let response = expect_status(OPERATION, status::CREATED, response)?;
    let id = ArchiveId::new(required_header(OPERATION, ARCHIVE_ID_HEADER, &response)?);

    tracing::info!(vault = %vault, archive_id = %id, size = archive.size(), "archive uploaded");
    archive.set_id(id.clone());
    Ok(id)
}

/// Delete a multipart upload by id, e.g. one left behind by another process.
pub async fn abort_multipart_upload(
    transport: &dyn Transport,
    vault: &Vault,
    upload_id: &UploadId,
) -> crate::Result<()> {
    const OPERATION: &str = "abort multipart upload";

    let request = Request::new(Method::Delete, vault.upload_path(upload_id));
    let response = transport.send(request).await?;
    expect_status(OPERATION, status::NO_CONTENT, response)?;
    tracing::info!(vault = %vault, upload_id = %upload_id, "aborted multipart upload");
    Ok(())
}

struct Progress {
    state: UploadState,
    upload_id: Option<UploadId>,
    acknowledged: BTreeSet<u64>,
}

/// Drives one multipart upload through initiate, part uploads, and complete or abort.
///
/// All methods take `&self`; part uploads may run concurrently and an abort
/// may be issued while parts are still in flight.
pub struct UploadCoordinator {
    transport: Arc<dyn Transport>,
    vault: Vault,
    description: Option<String>,
    progress: Mutex<Progress>,
}

impl UploadCoordinator {
    /// A coordinator for a new upload.
    pub fn new(transport: Arc<dyn Transport>, vault: Vault) -> Self {
        Self {
            transport,
            vault,
            description: None,
            progress: Mutex::new(Progress {
                state: UploadState::NotStarted,
                upload_id: None,
                acknowledged: BTreeSet::new(),
            }),
        }
    }

    /// Set the description sent on initiate.
    pub fn with_description(mut self, description: impl Into<String>) -> crate::Result<Self> {
        let description = description.into();
        validate_description(&description)?;
        self.description = Some(description).filter(|d| !d.is_empty());
        Ok(self)
    }

    /// Continue an upload started elsewhere, without calling initiate.
    ///
    /// The session must describe the same file layout as `archive`.
    pub fn resume(
        transport: Arc<dyn Transport>,
        vault: Vault,
        archive: &mut LocalArchive,
        session: &UploadSession,
    ) -> crate::Result<Self> {
        if session.size != archive.size() || session.part_size != archive.part_size() {
            return Err(Error::UploadSession(format!(
                "session describes {} bytes in {}-byte parts, archive has {} bytes in {}-byte parts",
                session.size,
                session.part_size,
                archive.size(),
                archive.part_size()
            )));
        }
        if let Some(&bad) = session
            .acknowledged
            .iter()
            .find(|&&p| p >= archive.part_count())
        {
            return Err(Error::UploadSession(format!(
                "session acknowledges part {bad} but archive has {} parts",
                archive.part_count()
            )));
        }
        if session.path != archive.path() {
            tracing::warn!(
                session_path = %session.path.display(),
                archive_path = %archive.path().display(),
                "resuming upload for a file at a different path"
            );
        }

        archive.set_multipart_upload_id(Some(session.upload_id.clone()));
        tracing::info!(
            vault = %vault,
            upload_id = %session.upload_id,
            acknowledged = session.acknowledged.len(),
            part_count = archive.part_count(),
            "resumed multipart upload"
        );

        Ok(Self {
            transport,
            vault,
            description: None,
            progress: Mutex::new(Progress {
                state: UploadState::InProgress,
                upload_id: Some(session.upload_id.clone()),
                acknowledged: session.acknowledged.clone(),
            }),
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn state(&self) -> UploadState {
        self.lock().state
    }

    pub fn upload_id(&self) -> Option<UploadId> {
        self.lock().upload_id.clone()
    }

    /// Acknowledged part indices.
    pub fn acknowledged(&self) -> BTreeSet<u64> {
        self.lock().acknowledged.clone()
    }

    /// Part indices of `archive` not yet acknowledged.
    pub fn missing_parts(&self, archive: &LocalArchive) -> Vec<u64> {
        let progress = self.lock();
        (0..archive.part_count())
            .filter(|p| !progress.acknowledged.contains(p))
            .collect()
    }

    /// Snapshot of the resumable state, once an upload id exists.
    pub fn session(&self, archive: &LocalArchive) -> Option<UploadSession> {
        let progress = self.lock();
        let upload_id = archive
            .multipart_upload_id()
            .cloned()
            .or_else(|| progress.upload_id.clone())?;
        Some(UploadSession {
            path: archive.path().to_path_buf(),
            size: archive.size(),
            part_size: archive.part_size(),
            upload_id,
            acknowledged: progress.acknowledged.clone(),
        })
    }

    /// Ask the store for a new upload sized to the archive's part size.
    pub async fn initiate(&self, archive: &mut LocalArchive) -> crate::Result<UploadId> {
        const OPERATION: &str = "initiate multipart upload";

        self.require_state(OPERATION, UploadState::NotStarted)?;
        if archive.part_count() == 0 {
            return Err(Error::UploadSession(
                "an empty archive cannot be uploaded in parts".to_string(),
            ));
        }

        let mut request = Request::new(Method::Post, self.vault.multipart_uploads_path())
            .header(PART_SIZE_HEADER, archive.part_size().to_string())
            .header(CONTENT_LENGTH, "0");
        if let Some(description) = &self.description {
            request = request.header(DESCRIPTION_HEADER, description.as_str());
        }

        let response = self.transport.send(request).await?;
        let response = expect_status(OPERATION, status::CREATED, response)?;
        let upload_id = UploadId::new(required_header(OPERATION, UPLOAD_ID_HEADER, &response)?);

        {
            let mut progress = self.lock();
            if progress.state != UploadState::NotStarted {
                return Err(Error::InvalidState {
                    operation: OPERATION,
                    state: progress.state,
                });
            }
            progress.state = UploadState::InProgress;
            progress.upload_id = Some(upload_id.clone());
            progress.acknowledged.clear();
        }
        archive.set_multipart_upload_id(Some(upload_id.clone()));

        tracing::info!(
            vault = %self.vault,
            upload_id = %upload_id,
            part_size = archive.part_size(),
            part_count = archive.part_count(),
            "initiated multipart upload"
        );
        Ok(upload_id)
    }

    /// Upload part `index`. Re-uploading an acknowledged part is allowed.
    pub async fn upload_part(
        &self,
        archive: &LocalArchive,
        index: u64,
    ) -> crate::Result<PartReceipt> {
        const OPERATION: &str = "upload part";

        self.require_state(OPERATION, UploadState::InProgress)?;
        let upload_id = self.current_upload_id(archive)?;
        let payload = archive.read_part(index).await?;
        let PartPayload {
            range,
            bytes,
            content_hash,
            tree_hash,
        } = payload;

        let request = Request::new(Method::Put, self.vault.upload_path(&upload_id))
            .header(CONTENT_LENGTH, bytes.len().to_string())
            .header(CONTENT_RANGE, range.content_range().to_string())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(TREE_HASH_HEADER, tree_hash.to_hex())
            .signed_header(CONTENT_HASH_HEADER, content_hash.to_hex())
            .body(bytes);

        tracing::debug!(
            upload_id = %upload_id,
            part = index,
            start = range.start,
            length = range.length,
            "sending part"
        );
        let response = self.transport.send(request).await?;
        expect_status(OPERATION, status::NO_CONTENT, response)?;

        let recorded = {
            let mut progress = self.lock();
            if progress.state == UploadState::InProgress {
                progress.acknowledged.insert(index);
                true
            } else {
                false
            }
        };
        if recorded {
            tracing::debug!(upload_id = %upload_id, part = index, "part acknowledged");
        } else {
            tracing::warn!(
                upload_id = %upload_id,
                part = index,
                "discarding part result received after the upload ended"
            );
        }

        Ok(PartReceipt {
            range,
            tree_hash,
            recorded,
        })
    }

    /// Upload every unacknowledged part with at most `max_parallel` in flight.
    pub async fn upload_parts(
        &self,
        archive: &LocalArchive,
        max_parallel: usize,
    ) -> crate::Result<Vec<PartReceipt>> {
        self.upload_parts_with(archive, max_parallel, |_| {}).await
    }

    /// Like [`upload_parts`](Self::upload_parts), calling `on_part` after each acknowledged part.
    pub async fn upload_parts_with<F>(
        &self,
        archive: &LocalArchive,
        max_parallel: usize,
        mut on_part: F,
    ) -> crate::Result<Vec<PartReceipt>>
    where
        F: FnMut(&PartReceipt),
    {
        let parallel = std::cmp::max(1, max_parallel);
        let mut pending = self.missing_parts(archive).into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut receipts = Vec::new();

        loop {
            while in_flight.len() < parallel {
                match pending.next() {
                    Some(index) => in_flight.push(self.upload_part(archive, index)),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some(result) => {
                    let receipt = result?;
                    on_part(&receipt);
                    receipts.push(receipt);
                }
                None => break,
            }
        }

        receipts.sort_by_key(|r| r.range.index);
        Ok(receipts)
    }

    /// Acknowledge parts the store already holds with matching tree hashes.
    ///
    /// Returns the indices newly acknowledged. Parts whose range or hash does
    /// not match the local file stay unacknowledged and will be re-sent.
    pub async fn reconcile(&self, archive: &LocalArchive) -> crate::Result<Vec<u64>> {
        const OPERATION: &str = "reconcile parts";

        self.require_state(OPERATION, UploadState::InProgress)?;
        let upload_id = self.current_upload_id(archive)?;
        let parts = listing::list_all_parts(self.transport.as_ref(), &self.vault, &upload_id).await?;

        let mut matched = Vec::new();
        for part in parts {
            let malformed = |e: Error| Error::MalformedResponse {
                operation: OPERATION,
                message: format!("part {:?}: {e}", part.range_in_bytes),
            };
            let span = ContentRange::parse_span(&part.range_in_bytes).map_err(malformed)?;
            let remote = TreeHash::from_hex(&part.sha256_tree_hash).map_err(malformed)?;
            let index = span.start / archive.part_size();
            let expected = match archive.part_range(index) {
                Ok(range) if range.start == span.start && range.length == span.length() => range,
                _ => {
                    tracing::warn!(
                        upload_id = %upload_id,
                        range = %part.range_in_bytes,
                        "store holds a part that does not match the local layout"
                    );
                    continue;
                }
            };
            let local = archive.part_tree_hash(expected.index).await?;
            if local != remote {
                tracing::warn!(
                    upload_id = %upload_id,
                    part = expected.index,
                    remote = %remote,
                    local = %local,
                    "stored part differs from local file, it will be re-sent"
                );
                continue;
            }
            matched.push(expected.index);
        }

        let mut newly = Vec::new();
        {
            let mut progress = self.lock();
            for index in matched {
                if progress.acknowledged.insert(index) {
                    newly.push(index);
                }
            }
        }
        tracing::info!(upload_id = %upload_id, recovered = newly.len(), "reconciled parts with store");
        Ok(newly)
    }

    /// Finish the upload once every part is acknowledged.
    pub async fn complete(&self, archive: &mut LocalArchive) -> crate::Result<ArchiveId> {
        const OPERATION: &str = "complete multipart upload";

        self.require_state(OPERATION, UploadState::InProgress)?;
        let missing = self.missing_parts(archive);
        if !missing.is_empty() {
            return Err(Error::MissingParts {
                missing,
                part_count: archive.part_count(),
            });
        }
        let upload_id = self.current_upload_id(archive)?;
        let tree_hash = archive.tree_hash().await?;

        let request = Request::new(Method::Post, self.vault.upload_path(&upload_id))
            .header(ARCHIVE_SIZE_HEADER, archive.size().to_string())
            .header(TREE_HASH_HEADER, tree_hash.to_hex());

        let response = self.transport.send(request).await?;
        let response = expect_status(OPERATION, status::CREATED, response)?;
        let id = ArchiveId::new(required_header(OPERATION, ARCHIVE_ID_HEADER, &response)?);

        {
            let mut progress = self.lock();
            if progress.state == UploadState::InProgress {
                progress.state = UploadState::Completed;
            } else {
                tracing::warn!(
                    upload_id = %upload_id,
                    state = %progress.state,
                    "upload ended before completion was acknowledged"
                );
            }
        }
        archive.set_id(id.clone());
        archive.set_multipart_upload_id(None);

        tracing::info!(
            vault = %self.vault,
            upload_id = %upload_id,
            archive_id = %id,
            size = archive.size(),
            tree_hash = %tree_hash,
            "completed multipart upload"
        );
        Ok(id)
    }

    /// Delete the upload. A no-op once the upload is aborted or completed.
    pub async fn abort(&self, archive: &LocalArchive) -> crate::Result<()> {
        const OPERATION: &str = "abort multipart upload";

        let upload_id = {
            let progress = self.lock();
            if progress.state.is_terminal() {
                tracing::debug!(state = %progress.state, "abort ignored");
                return Ok(());
            }
            archive
                .multipart_upload_id()
                .cloned()
                .or_else(|| progress.upload_id.clone())
                .ok_or(Error::InvalidState {
                    operation: OPERATION,
                    state: progress.state,
                })?
        };

        abort_multipart_upload(self.transport.as_ref(), &self.vault, &upload_id).await?;

        let mut progress = self.lock();
        if !progress.state.is_terminal() {
            progress.state = UploadState::Aborted;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_state(&self, operation: &'static str, required: UploadState) -> crate::Result<()> {
        let state = self.lock().state;
        if state != required {
            return Err(Error::InvalidState { operation, state });
        }
        Ok(())
    }

    fn current_upload_id(&self, archive: &LocalArchive) -> crate::Result<UploadId> {
        archive
            .multipart_upload_id()
            .cloned()
            .or_else(|| self.lock().upload_id.clone())
            .ok_or_else(|| Error::UploadSession("archive has no multipart upload id".to_string()))
    }
}

impl fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.lock();
        f.debug_struct("UploadCoordinator")
            .field("vault", &self.vault)
            .field("state", &progress.state)
            .field("upload_id", &progress.upload_id)
            .field("acknowledged", &progress.acknowledged.len())
            .finish()
    }
}

/// Pass `response` through when it has the expected status.
pub(crate) fn expect_status(
    operation: &'static str,
    expected: u16,
    response: Response,
) -> crate::Result<Response> {
    if response.status != expected {
        tracing::debug!(operation, expected, status = response.status, "unexpected status");
        return Err(Error::UnexpectedStatus {
            operation,
            expected,
            response: Box::new(response),
        });
    }
    Ok(response)
}

fn required_header(
    operation: &'static str,
    header: &'static str,
    response: &Response,
) -> crate::Result<String> {
    match response.header(header).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(Error::MissingHeader {
            operation,
            header,
            response: Box::new(response.clone()),
        }),
    }
}
