//! Chunk digests and tree hash reduction.
//!
//! A byte range is split into [`CHUNK_SIZE`](crate::CHUNK_SIZE) chunks, each
//! chunk is hashed with SHA-256, and the ordered chunk digests are reduced
//! pairwise into a single root. At every level an unpaired trailing digest is
//! promoted to the next level as-is; it is neither re-hashed nor duplicated.

use crate::hash::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Raw SHA-256 of a single chunk.
pub type ChunkDigest = Digest;

/// Root of a chunk digest tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeHash(Digest);

impl TreeHash {
    /// Tree hash of an empty byte range: the digest of a single empty chunk.
    pub fn empty() -> Self {
        Self(Digest::compute(&[]))
    }

    /// Get the underlying digest.
    pub fn digest(&self) -> &Digest {
        &self.0
    }

    /// Parse a hex tree hash as reported by the store.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        Ok(Self(Digest::from_hex(s)?))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Reduce ordered chunk digests to their tree root.
///
/// Returns `None` for an empty sequence, which has no defined root.
pub fn reduce_tree(digests: &[ChunkDigest]) -> Option<TreeHash> {
    let mut level: Vec<Digest> = digests.to_vec();
    if level.is_empty() {
        return None;
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut pairs = level.chunks_exact(2);
        for pair in &mut pairs {
            next.push(Digest::combine(&pair[0], &pair[1]));
        }
        if let [carried] = pairs.remainder() {
            next.push(*carried);
        }
        level = next;
    }

    Some(TreeHash(level[0]))
}

/// Tree hash of a digest sequence, using [`TreeHash::empty`] for no digests.
pub fn tree_hash(digests: &[ChunkDigest]) -> TreeHash {
    reduce_tree(digests).unwrap_or_else(TreeHash::empty)
}

/// Digest every `chunk_size` window of an in-memory buffer.
pub fn chunk_digests_of(data: &[u8], chunk_size: u64) -> Vec<ChunkDigest> {
    let chunk_size = usize::try_from(chunk_size).unwrap_or(usize::MAX).max(1);
    data.chunks(chunk_size).map(Digest::compute).collect()
}

/// Tree hash of an in-memory buffer with standard 1 MiB chunks.
pub fn tree_hash_of(data: &[u8]) -> TreeHash {
    tree_hash(&chunk_digests_of(data, crate::CHUNK_SIZE))
}

/// Digest `length` bytes of `source` starting at `start`, one chunk at a time.
///
/// Only one chunk is held in memory. The source must contain the whole range;
/// running out of bytes early is reported as [`Error::ShortRead`](crate::Error::ShortRead)
/// against `origin`.
pub async fn chunk_digests<R>(
    source: &mut R,
    origin: &std::path::Path,
    start: u64,
    length: u64,
    chunk_size: u64,
) -> crate::Result<Vec<ChunkDigest>>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let count = length.div_ceil(chunk_size);
    let mut digests = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    if length == 0 {
        return Ok(digests);
    }

    source.seek(SeekFrom::Start(start)).await?;
    let buf_len = usize::try_from(chunk_size.min(length))
        .map_err(|_| std::io::Error::other("chunk size exceeds platform limits"))?;
    let mut buf = vec![0u8; buf_len];

    let mut remaining = length;
    while remaining > 0 {
        let want = chunk_size.min(remaining) as usize;
        let offset = start + (length - remaining);
        read_full(source, &mut buf[..want], origin, offset).await?;
        digests.push(Digest::compute(&buf[..want]));
        remaining -= want as u64;
    }

    Ok(digests)
}

/// Fill `buf` completely, mapping EOF to a short-read error.
pub(crate) async fn read_full<R>(
    source: &mut R,
    buf: &mut [u8],
    origin: &std::path::Path,
    offset: u64,
) -> crate::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(crate::Error::ShortRead {
                path: origin.to_path_buf(),
                offset,
                expected: buf.len() as u64,
                actual: filled as u64,
            });
        }
        filled += n;
    }
    Ok(())
}
