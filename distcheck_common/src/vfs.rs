use crate::{FileEntry, FileMetadata, VfsError};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Virtual File System trait for abstracting filesystem operations
///
/// Source and target trees are both reached through this trait, so the check
/// engine treats the local filesystem and object stores (S3, COS) uniformly.
/// Paths handed to a VFS are hierarchical components relative to its own root.
pub trait Vfs: Send + Sync {
    /// Uniquely identifies the VFS instance (e.g., "local:/", "s3://bucket/")
    fn instance_id(&self) -> &str;

    /// Returns the metadata for a specific path
    fn metadata(&self, path: &Path) -> Result<FileMetadata, VfsError>;

    /// Lists the contents of a directory
    fn read_dir(&self, path: &Path) -> Result<Vec<FileEntry>, VfsError>;

    /// Opens a file for reading (returns a Read trait object)
    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, VfsError>;

    /// Checks if a path exists
    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    /// Returns the content digest the storage system reports for a file.
    ///
    /// Filesystems that keep no such metadata answer `Unsupported`.
    fn extended_status(&self, _path: &Path) -> Result<RemoteDigest, VfsError> {
        Ok(RemoteDigest::Unsupported)
    }

    /// Get the capabilities of this VFS
    fn capabilities(&self) -> VfsCapabilities {
        VfsCapabilities::plain()
    }
}

/// Capabilities flags for VFS implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsCapabilities {
    /// `read_dir` works, so the tree can be listed
    pub list: bool,
    /// `extended_status` may report a digest
    pub extended_status: bool,
}

impl VfsCapabilities {
    /// Plain filesystem: listable, no remote digests
    pub fn plain() -> Self {
        Self {
            list: true,
            extended_status: false,
        }
    }

    /// Object store that reports digests alongside its metadata
    pub fn object_store() -> Self {
        Self {
            list: true,
            extended_status: true,
        }
    }
}

/// Digest a storage system reports for an object, as surfaced by
/// [`Vfs::extended_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteDigest {
    /// CRC-64/ECMA-182 computed by the store over the exact object bytes
    Crc64(u64),
    /// Opaque entity tag, conventionally the MD5 hex digest of the content
    ETag(String),
    /// The store supports extended status but reported no digest for this object
    NoDigest,
    /// The filesystem has no notion of extended status at all
    Unsupported,
}

impl RemoteDigest {
    /// Builds a CRC-64 digest from a big-endian big-integer byte string.
    ///
    /// Only the low 64 bits are kept, so a sign byte prefix is harmless.
    pub fn crc64_from_be_bytes(bytes: &[u8]) -> Self {
        let value = bytes
            .iter()
            .rev()
            .take(8)
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));
        RemoteDigest::Crc64(value)
    }

    /// Parses the decimal form used by the `x-cos-hash-crc64ecma` header.
    ///
    /// Values wider than 64 bits keep their low 64 bits; anything past
    /// `u128` is not a CRC-64 header and yields `None`.
    pub fn crc64_from_decimal(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u128 = text.parse().ok()?;
        Some(Self::crc64_from_be_bytes(&value.to_be_bytes()))
    }

    /// Normalises an ETag header value: surrounding quotes and a weak prefix are dropped
    pub fn etag(raw: &str) -> Self {
        let tag = raw.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        let tag = tag.trim_matches('"');
        if tag.is_empty() {
            RemoteDigest::NoDigest
        } else {
            RemoteDigest::ETag(tag.to_string())
        }
    }
}
