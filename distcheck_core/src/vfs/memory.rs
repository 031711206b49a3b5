//! In-memory VFS
//!
//! Holds a small tree entirely in memory and counts every call made against
//! it, so checks can be driven end to end without touching a real disk or an
//! object store. It can behave either as a plain filesystem or as an object
//! store that reports per-object digests.

use distcheck_common::{FileEntry, FileMetadata, RemoteDigest, Vfs, VfsCapabilities, VfsError};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug, Clone)]
enum MemoryNode {
    Dir,
    File {
        data: Vec<u8>,
        digest: RemoteDigest,
        unreadable: bool,
    },
}

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct CallCounts {
    metadata: AtomicUsize,
    open_file: AtomicUsize,
    extended_status: AtomicUsize,
}

impl CallCounts {
    pub fn metadata(&self) -> usize {
        self.metadata.load(Ordering::Relaxed)
    }

    pub fn open_file(&self) -> usize {
        self.open_file.load(Ordering::Relaxed)
    }

    pub fn extended_status(&self) -> usize {
        self.extended_status.load(Ordering::Relaxed)
    }
}

/// A VFS backed by a map of paths to nodes
pub struct MemoryVfs {
    instance_id: String,
    nodes: RwLock<BTreeMap<PathBuf, MemoryNode>>,
    object_store: bool,
    modified: SystemTime,
    calls: CallCounts,
}

impl MemoryVfs {
    /// Plain filesystem: `extended_status` answers `Unsupported`
    pub fn new(name: &str) -> Self {
        Self::build(name, false)
    }

    /// Object store: `extended_status` reports each file's digest
    pub fn object_store(name: &str) -> Self {
        Self::build(name, true)
    }

    fn build(name: &str, object_store: bool) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::new(), MemoryNode::Dir);
        Self {
            instance_id: format!("memory:{}", name),
            nodes: RwLock::new(nodes),
            object_store,
            modified: SystemTime::now(),
            calls: CallCounts::default(),
        }
    }

    /// Adds a file without a stored digest, creating parent directories
    pub fn add_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.insert_file(path.as_ref(), data.into(), RemoteDigest::NoDigest, false);
    }

    /// Adds a file whose store-side digest is `digest`
    pub fn add_file_with_digest(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        digest: RemoteDigest,
    ) {
        self.insert_file(path.as_ref(), data.into(), digest, false);
    }

    /// Adds a file whose content stream fails part-way through
    pub fn add_unreadable_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.insert_file(path.as_ref(), data.into(), RemoteDigest::NoDigest, true);
    }

    /// Adds a directory and its parents
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let key = normalize(path.as_ref());
        if let Ok(mut nodes) = self.nodes.write() {
            insert_parents(&mut nodes, &key);
            nodes.insert(key, MemoryNode::Dir);
        }
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    fn insert_file(&self, path: &Path, data: Vec<u8>, digest: RemoteDigest, unreadable: bool) {
        let key = normalize(path);
        if let Ok(mut nodes) = self.nodes.write() {
            insert_parents(&mut nodes, &key);
            nodes.insert(
                key,
                MemoryNode::File {
                    data,
                    digest,
                    unreadable,
                },
            );
        }
    }

    fn node(&self, path: &Path) -> Result<MemoryNode, VfsError> {
        let key = normalize(path);
        let nodes = self
            .nodes
            .read()
            .map_err(|e| VfsError::Io(std::io::Error::other(format!("Lock error: {}", e))))?;
        nodes
            .get(&key)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(path.display().to_string()))
    }
}

impl Vfs for MemoryVfs {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, VfsError> {
        self.calls.metadata.fetch_add(1, Ordering::Relaxed);
        let (size, is_dir) = match self.node(path)? {
            MemoryNode::Dir => (0, true),
            MemoryNode::File { data, .. } => (data.len() as u64, false),
        };
        Ok(FileMetadata {
            size,
            modified: self.modified,
            is_dir,
            is_symlink: false,
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileEntry>, VfsError> {
        let dir = normalize(path);
        match self.node(&dir)? {
            MemoryNode::Dir => {}
            MemoryNode::File { .. } => {
                return Err(VfsError::NotADirectory(path.display().to_string()))
            }
        }

        let nodes = self
            .nodes
            .read()
            .map_err(|e| VfsError::Io(std::io::Error::other(format!("Lock error: {}", e))))?;

        Ok(nodes
            .iter()
            .filter(|(key, _)| key.parent() == Some(dir.as_path()) && !key.as_os_str().is_empty())
            .map(|(key, node)| {
                let (size, is_dir) = match node {
                    MemoryNode::Dir => (0, true),
                    MemoryNode::File { data, .. } => (data.len() as u64, false),
                };
                FileEntry {
                    path: key.clone(),
                    size,
                    modified: self.modified,
                    is_dir,
                }
            })
            .collect())
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, VfsError> {
        self.calls.open_file.fetch_add(1, Ordering::Relaxed);
        match self.node(path)? {
            MemoryNode::Dir => Err(VfsError::NotAFile(path.display().to_string())),
            MemoryNode::File {
                data,
                unreadable: false,
                ..
            } => Ok(Box::new(Cursor::new(data))),
            MemoryNode::File { data, .. } => Ok(Box::new(FailingReader {
                inner: Cursor::new(data),
                served: false,
            })),
        }
    }

    fn extended_status(&self, path: &Path) -> Result<RemoteDigest, VfsError> {
        self.calls.extended_status.fetch_add(1, Ordering::Relaxed);
        if !self.object_store {
            return Ok(RemoteDigest::Unsupported);
        }
        match self.node(path)? {
            MemoryNode::Dir => Ok(RemoteDigest::NoDigest),
            MemoryNode::File { digest, .. } => Ok(digest),
        }
    }

    fn capabilities(&self) -> VfsCapabilities {
        if self.object_store {
            VfsCapabilities::object_store()
        } else {
            VfsCapabilities::plain()
        }
    }
}

/// Serves one read, then fails
struct FailingReader {
    inner: Cursor<Vec<u8>>,
    served: bool,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.served {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "stream reset by peer",
            ));
        }
        self.served = true;
        let limit = buf.len().min(1);
        self.inner.read(&mut buf[..limit])
    }
}

/// Relative, separator-agnostic key: `/a//b/` and `a/b` are the same node
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn insert_parents(nodes: &mut BTreeMap<PathBuf, MemoryNode>, key: &Path) {
    let mut current = key.parent();
    while let Some(parent) = current {
        nodes.entry(parent.to_path_buf()).or_insert(MemoryNode::Dir);
        current = parent.parent();
    }
}
