//! Core engine for uploading archives to a Glacier-compatible cold store.
//!
//! This crate defines the data model and upload logic shared by the other crates:
//! - Chunk digests and tree hash reduction
//! - Local archives and their part layout
//! - Multipart upload lifecycle and resumable sessions
//! - The transport seam that request signing and HTTP plug into

pub mod archive;
pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod listing;
pub mod range;
pub mod transport;
pub mod upload;
pub mod vault;

pub use archive::{ArchiveId, ArchiveRef, LocalArchive, PartPayload, validate_part_size};
pub use chunk::{ChunkDigest, TreeHash, reduce_tree, tree_hash, tree_hash_of};
pub use config::{ClientConfig, UploadConfig};
pub use error::{Error, ErrorKind, Result};
pub use hash::Digest;
pub use listing::{MultipartUploadList, PartList, PartListEntry, UploadListEntry};
pub use range::{ContentRange, PartRange};
pub use transport::{Method, Request, Response, Transport};
pub use upload::{
    PartReceipt, UploadCoordinator, UploadId, UploadSession, UploadState, UploadStrategy,
    abort_multipart_upload, upload_archive,
};
pub use vault::Vault;

/// Tree hash chunk size: 1 MiB
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Default part size: 64 MiB
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum part size: 1 MiB
pub const MIN_PART_SIZE: u64 = 1024 * 1024;

/// Maximum part size: 4 GiB
pub const MAX_PART_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Largest archive accepted in a single request: 4 GiB
pub const MAX_SINGLE_UPLOAD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Length of a store-issued archive id.
pub const ARCHIVE_ID_LEN: usize = 138;

/// Maximum archive description length.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// API version sent with every request.
pub const GLACIER_API_VERSION: &str = "2012-06-01";
