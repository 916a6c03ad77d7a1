//! Local archives, remote archive references, and per-part queries.

use crate::chunk::{self, TreeHash};
use crate::hash::Digest;
use crate::range::PartRange;
use crate::upload::UploadId;
use crate::{ARCHIVE_ID_LEN, CHUNK_SIZE, DEFAULT_PART_SIZE, Error, MAX_PART_SIZE, MIN_PART_SIZE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;

/// Read size used for flat (non-tree) hashing.
const HASH_READ_SIZE: usize = 64 * 1024;

/// Opaque id the store assigns to a stored archive.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveId(String);

impl ArchiveId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `s` has the length of a store-issued archive id.
    pub fn has_archive_id_length(s: &str) -> bool {
        s.len() == ARCHIVE_ID_LEN
    }
}

impl fmt::Debug for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveId({})", self.0)
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `size` is a part size the store accepts.
pub fn validate_part_size(size: u64) -> crate::Result<u64> {
    let valid = (MIN_PART_SIZE..=MAX_PART_SIZE).contains(&size)
        && size % MIN_PART_SIZE == 0
        && (size / MIN_PART_SIZE).is_power_of_two();
    if !valid {
        return Err(Error::InvalidPartSize {
            size,
            min: MIN_PART_SIZE,
            max: MAX_PART_SIZE,
        });
    }
    Ok(size)
}

/// Either a local file pending upload or an archive already in the store.
#[derive(Debug)]
pub enum ArchiveRef {
    Local(LocalArchive),
    Remote(ArchiveId),
}

impl ArchiveRef {
    /// Explicitly reference a local file.
    pub async fn local(path: impl AsRef<Path>) -> crate::Result<Self> {
        Ok(Self::Local(LocalArchive::open(path).await?))
    }

    /// Explicitly reference a stored archive.
    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote(ArchiveId::new(id))
    }

    /// Infer the kind of reference from a single string.
    ///
    /// The input is a remote id only when it is exactly
    /// [`ARCHIVE_ID_LEN`] bytes long and no regular file exists at that path.
    /// Anything else is opened as a local file.
    pub async fn resolve(input: &str) -> crate::Result<Self> {
        Self::resolve_with_part_size(input, DEFAULT_PART_SIZE).await
    }

    /// Like [`resolve`](Self::resolve) with an explicit part size for local files.
    pub async fn resolve_with_part_size(input: &str, part_size: u64) -> crate::Result<Self> {
        if ArchiveId::has_archive_id_length(input) && !is_regular_file(Path::new(input)).await {
            tracing::debug!(id = %input, "treating input as a remote archive id");
            return Ok(Self::Remote(ArchiveId::new(input)));
        }
        Ok(Self::Local(
            LocalArchive::open_with_part_size(input, part_size).await?,
        ))
    }

    pub fn as_local(&self) -> Option<&LocalArchive> {
        match self {
            Self::Local(archive) => Some(archive),
            Self::Remote(_) => None,
        }
    }

    pub fn into_local(self) -> Option<LocalArchive> {
        match self {
            Self::Local(archive) => Some(archive),
            Self::Remote(_) => None,
        }
    }

    /// The archive id, if the archive is remote or has been uploaded.
    pub fn id(&self) -> Option<&ArchiveId> {
        match self {
            Self::Local(archive) => archive.id(),
            Self::Remote(id) => Some(id),
        }
    }
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// One part read into memory, with hashes computed over exactly those bytes.
#[derive(Clone)]
pub struct PartPayload {
    pub range: PartRange,
    pub bytes: Bytes,
    pub content_hash: Digest,
    pub tree_hash: TreeHash,
}

impl fmt::Debug for PartPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartPayload")
            .field("range", &self.range)
            .field("content_hash", &self.content_hash)
            .field("tree_hash", &self.tree_hash)
            .finish()
    }
}

/// A local file viewed as an archive split into fixed-size parts.
///
/// Size, part size and part count are fixed when the archive is opened; the
/// file is assumed not to change afterwards. Every read opens its own file
/// handle, so reads of different parts never share a cursor.
pub struct LocalArchive {
    path: PathBuf,
    size: u64,
    part_size: u64,
    part_count: u64,
    content_hash: OnceCell<Digest>,
    tree_hash: OnceCell<TreeHash>,
    id: Option<ArchiveId>,
    multipart_upload_id: Option<UploadId>,
}

impl LocalArchive {
    /// Open a file with the default 64 MiB part size.
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        Self::open_with_part_size(path, DEFAULT_PART_SIZE).await
    }

    /// Open a file with an explicit part size.
    pub async fn open_with_part_size(path: impl AsRef<Path>, part_size: u64) -> crate::Result<Self> {
        let part_size = validate_part_size(part_size)?;
        let path = path.as_ref().to_path_buf();

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
        let metadata = file.metadata().await.map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(Error::Open {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ),
            });
        }

        let size = metadata.len();
        let part_count = size.div_ceil(part_size);
        tracing::debug!(path = %path.display(), size, part_size, part_count, "opened archive");

        Ok(Self {
            path,
            size,
            part_size,
            part_count,
            content_hash: OnceCell::new(),
            tree_hash: OnceCell::new(),
            id: None,
            multipart_upload_id: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes, as observed when the archive was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// `ceil(size / part_size)`; zero for an empty file.
    pub fn part_count(&self) -> u64 {
        self.part_count
    }

    /// Store-assigned id, set once an upload completes.
    pub fn id(&self) -> Option<&ArchiveId> {
        self.id.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: ArchiveId) {
        self.id = Some(id);
    }

    /// Id of the multipart upload in flight for this archive.
    pub fn multipart_upload_id(&self) -> Option<&UploadId> {
        self.multipart_upload_id.as_ref()
    }

    /// Attach the id of an upload started elsewhere, e.g. by another process.
    pub fn set_multipart_upload_id(&mut self, upload_id: Option<UploadId>) {
        self.multipart_upload_id = upload_id;
    }

    /// Byte range of part `index`.
    pub fn part_range(&self, index: u64) -> crate::Result<PartRange> {
        PartRange::for_part(index, self.size, self.part_size).ok_or(Error::PartOutOfRange {
            index,
            part_count: self.part_count,
        })
    }

    /// All part ranges in order.
    pub fn parts(&self) -> impl Iterator<Item = PartRange> + '_ {
        (0..self.part_count).filter_map(|p| PartRange::for_part(p, self.size, self.part_size))
    }

    /// `Content-Range` header value of part `index`.
    pub fn content_range_header(&self, index: u64) -> crate::Result<String> {
        Ok(self.part_range(index)?.content_range().to_string())
    }

    /// Flat SHA-256 of the whole file. Computed once.
    pub async fn content_hash(&self) -> crate::Result<Digest> {
        let digest = self
            .content_hash
            .get_or_try_init(|| self.flat_hash(0, self.size))
            .await?;
        Ok(*digest)
    }

    /// Tree hash of the whole file. Computed once.
    pub async fn tree_hash(&self) -> crate::Result<TreeHash> {
        let hash = self
            .tree_hash
            .get_or_try_init(|| self.range_tree_hash(0, self.size))
            .await?;
        Ok(*hash)
    }

    /// Exactly the bytes of part `index`.
    pub async fn part_bytes(&self, index: u64) -> crate::Result<Bytes> {
        let range = self.part_range(index)?;
        let length = usize::try_from(range.length)
            .map_err(|_| std::io::Error::other("part size exceeds platform limits"))?;

        let mut file = self.reopen().await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut data = vec![0u8; length];
        chunk::read_full(&mut file, &mut data, &self.path, range.start).await?;
        Ok(Bytes::from(data))
    }

    /// Flat SHA-256 of part `index`, streamed.
    pub async fn part_content_hash(&self, index: u64) -> crate::Result<Digest> {
        let range = self.part_range(index)?;
        self.flat_hash(range.start, range.length).await
    }

    /// Tree hash of part `index`, streamed one chunk at a time.
    pub async fn part_tree_hash(&self, index: u64) -> crate::Result<TreeHash> {
        let range = self.part_range(index)?;
        self.range_tree_hash(range.start, range.length).await
    }

    /// Read part `index` once and hash exactly the bytes that were read.
    pub async fn read_part(&self, index: u64) -> crate::Result<PartPayload> {
        let range = self.part_range(index)?;
        let bytes = self.part_bytes(index).await?;
        let content_hash = Digest::compute(&bytes);
        let tree_hash = chunk::tree_hash_of(&bytes);
        tracing::debug!(
            path = %self.path.display(),
            part = index,
            start = range.start,
            length = range.length,
            tree_hash = %tree_hash,
            "read part"
        );
        Ok(PartPayload {
            range,
            bytes,
            content_hash,
            tree_hash,
        })
    }

    /// Read the whole file for a single-request upload.
    ///
    /// The whole-file hashes are taken from the bytes read and cached, so the
    /// headers always describe the body that is sent.
    pub async fn read_all(&self) -> crate::Result<PartPayload> {
        let length = usize::try_from(self.size)
            .map_err(|_| std::io::Error::other("archive size exceeds platform limits"))?;
        let mut file = self.reopen().await?;
        let mut data = vec![0u8; length];
        chunk::read_full(&mut file, &mut data, &self.path, 0).await?;

        let content_hash = Digest::compute(&data);
        let tree_hash = chunk::tree_hash_of(&data);
        let _ = self.content_hash.set(content_hash);
        let _ = self.tree_hash.set(tree_hash);

        Ok(PartPayload {
            range: PartRange {
                index: 0,
                start: 0,
                length: self.size,
            },
            bytes: Bytes::from(data),
            content_hash,
            tree_hash,
        })
    }

    async fn reopen(&self) -> crate::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| Error::Open {
                path: self.path.clone(),
                source,
            })
    }

    async fn flat_hash(&self, start: u64, length: u64) -> crate::Result<Digest> {
        let mut file = self.reopen().await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut hasher = Digest::hasher();
        let mut buf = vec![0u8; HASH_READ_SIZE];
        let mut remaining = length;
        while remaining > 0 {
            let want = (HASH_READ_SIZE as u64).min(remaining) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::ShortRead {
                    path: self.path.clone(),
                    offset: start,
                    expected: length,
                    actual: length - remaining,
                });
            }
            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }

        let digest = hasher.finalize();
        tracing::debug!(path = %self.path.display(), start, length, %digest, "computed content hash");
        Ok(digest)
    }

    async fn range_tree_hash(&self, start: u64, length: u64) -> crate::Result<TreeHash> {
        let mut file = self.reopen().await?;
        let digests = chunk::chunk_digests(&mut file, &self.path, start, length, CHUNK_SIZE).await?;
        let hash = chunk::tree_hash(&digests);
        tracing::debug!(
            path = %self.path.display(),
            start,
            length,
            chunks = digests.len(),
            tree_hash = %hash,
            "computed tree hash"
        );
        Ok(hash)
    }
}

impl fmt::Debug for LocalArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalArchive")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("part_size", &self.part_size)
            .field("part_count", &self.part_count)
            .field("id", &self.id)
            .field("multipart_upload_id", &self.multipart_upload_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MIB: u64 = 1024 * 1024;

    fn write_temp(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 253) as u8).collect()
    }

    #[test]
    fn test_validate_part_size() {
        assert!(validate_part_size(MIB).is_ok());
        assert!(validate_part_size(64 * MIB).is_ok());
        assert!(validate_part_size(4096 * MIB).is_ok());
        for bad in [0, 1024, MIB + 1, 3 * MIB, 8192 * MIB] {
            assert!(validate_part_size(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_five_kb_file_single_chunk() {
        let file = write_temp(&pattern(5120));
        let archive = LocalArchive::open(file.path()).await.unwrap();

        assert_eq!(archive.size(), 5120);
        assert_eq!(archive.part_count(), 1);
        assert!(archive.id().is_none());
        let content = archive.content_hash().await.unwrap();
        let tree = archive.tree_hash().await.unwrap();
        assert_eq!(tree.digest(), &content);
        assert_eq!(content, Digest::compute(&pattern(5120)));
    }

    #[tokio::test]
    async fn test_multi_chunk_tree_hash_differs_from_flat_hash() {
        let data = pattern((2 * MIB + 10) as usize);
        let file = write_temp(&data);
        let archive = LocalArchive::open(file.path()).await.unwrap();

        let tree = archive.tree_hash().await.unwrap();
        assert_eq!(tree, chunk::tree_hash_of(&data));
        assert_ne!(tree.digest(), &archive.content_hash().await.unwrap());
    }

    #[tokio::test]
    async fn test_part_queries() {
        let data = pattern((2 * MIB + MIB / 2) as usize);
        let file = write_temp(&data);
        let archive = LocalArchive::open_with_part_size(file.path(), MIB)
            .await
            .unwrap();

        assert_eq!(archive.part_count(), 3);
        assert_eq!(archive.parts().count(), 3);
        assert_eq!(archive.content_range_header(0).unwrap(), "bytes 0-1048575/*");
        assert_eq!(
            archive.content_range_header(2).unwrap(),
            "bytes 2097152-2621439/*"
        );

        let last = archive.part_bytes(2).await.unwrap();
        assert_eq!(&last[..], &data[2 * MIB as usize..]);

        let payload = archive.read_part(1).await.unwrap();
        let expected = &data[MIB as usize..2 * MIB as usize];
        assert_eq!(&payload.bytes[..], expected);
        assert_eq!(payload.content_hash, Digest::compute(expected));
        assert_eq!(payload.content_hash, archive.part_content_hash(1).await.unwrap());
        assert_eq!(payload.tree_hash, archive.part_tree_hash(1).await.unwrap());

        match archive.part_range(3) {
            Err(Error::PartOutOfRange { index, part_count }) => {
                assert_eq!(index, 3);
                assert_eq!(part_count, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(archive.part_bytes(3).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_file_is_short_read() {
        let data = pattern((2 * MIB) as usize);
        let file = write_temp(&data);
        let archive = LocalArchive::open_with_part_size(file.path(), MIB)
            .await
            .unwrap();

        file.as_file().set_len(MIB + 10).unwrap();

        let err = archive.part_bytes(1).await.unwrap_err();
        assert!(matches!(err, Error::ShortRead { .. }), "{err:?}");
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert!(matches!(
            archive.content_hash().await.unwrap_err(),
            Error::ShortRead { .. }
        ));
    }

    #[tokio::test]
    async fn test_large_sparse_file_part_layout() {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(150 * MIB).unwrap();
        let archive = LocalArchive::open(file.path()).await.unwrap();

        assert_eq!(archive.part_count(), 3);
        let last = archive.part_range(2).unwrap();
        assert_eq!(last.length, 150 * MIB - 2 * 64 * MIB);
        assert_eq!(archive.part_range(0).unwrap().length, 64 * MIB);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let file = write_temp(b"");
        let archive = LocalArchive::open(file.path()).await.unwrap();
        assert_eq!(archive.part_count(), 0);
        assert_eq!(archive.tree_hash().await.unwrap(), TreeHash::empty());
        assert_eq!(
            archive.tree_hash().await.unwrap().digest(),
            &archive.content_hash().await.unwrap()
        );
        assert!(archive.part_range(0).is_err());
    }

    #[tokio::test]
    async fn test_read_all_primes_hashes() {
        let data = pattern((MIB + 7) as usize);
        let file = write_temp(&data);
        let archive = LocalArchive::open(file.path()).await.unwrap();

        let payload = archive.read_all().await.unwrap();
        assert_eq!(payload.bytes.len(), data.len());
        assert_eq!(payload.tree_hash, chunk::tree_hash_of(&data));

        // Cached values survive the file going away.
        drop(file);
        assert_eq!(archive.tree_hash().await.unwrap(), payload.tree_hash);
        assert_eq!(archive.content_hash().await.unwrap(), payload.content_hash);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = LocalArchive::open("/definitely/not/here.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_open_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalArchive::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_remote_and_local() {
        let id = "a".repeat(ARCHIVE_ID_LEN);
        match ArchiveRef::resolve(&id).await.unwrap() {
            ArchiveRef::Remote(remote) => assert_eq!(remote.as_str(), id),
            other => panic!("expected remote, got {other:?}"),
        }

        let file = write_temp(b"hello");
        let path = file.path().to_str().unwrap().to_string();
        let resolved = ArchiveRef::resolve(&path).await.unwrap();
        assert_eq!(resolved.as_local().map(|a| a.size()), Some(5));
        assert!(resolved.id().is_none());

        // Wrong length and missing on disk is an I/O error, not a remote id.
        assert!(ArchiveRef::resolve("nope.bin").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_prefers_existing_file_of_id_length() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = format!("{}/", dir.path().display());
        let name = "f".repeat(ARCHIVE_ID_LEN - prefix.len());
        let path = format!("{prefix}{name}");
        assert_eq!(path.len(), ARCHIVE_ID_LEN);
        std::fs::write(&path, b"local").unwrap();

        let resolved = ArchiveRef::resolve(&path).await.unwrap();
        assert!(matches!(resolved, ArchiveRef::Local(_)));
    }

    #[tokio::test]
    async fn test_explicit_constructors() {
        let remote = ArchiveRef::remote("short-id");
        assert_eq!(remote.id().map(|id| id.as_str()), Some("short-id"));
        assert!(remote.into_local().is_none());

        let file = write_temp(b"x");
        let local = ArchiveRef::local(file.path()).await.unwrap();
        assert!(local.into_local().is_some());
    }
}
