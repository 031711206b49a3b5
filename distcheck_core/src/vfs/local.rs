use distcheck_common::{FileEntry, FileMetadata, Vfs, VfsCapabilities, VfsError};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Local filesystem VFS implementation
///
/// Read-only. Plain disks keep no content digests, so `extended_status`
/// keeps the trait default of `Unsupported`.
pub struct LocalVfs {
    instance_id: String,
    root: PathBuf,
}

impl LocalVfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let instance_id = format!("local:{}", root.display());
        Self { instance_id, root }
    }

    /// VFS over the whole local filesystem
    pub fn system() -> Self {
        Self::new("/")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Vfs for LocalVfs {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, VfsError> {
        let full_path = self.full_path(path);
        let meta = fs::metadata(&full_path)?;
        let is_symlink = fs::symlink_metadata(&full_path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        // directories report zero length, as object stores and HDFS do
        Ok(FileMetadata {
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
            is_symlink,
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileEntry>, VfsError> {
        let full_path = self.full_path(path);

        if !full_path.is_dir() {
            return Err(VfsError::NotADirectory(full_path.display().to_string()));
        }

        let entries = fs::read_dir(&full_path)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let meta = entry.metadata().ok()?;
                let rel_path = entry.path().strip_prefix(&self.root).ok()?.to_path_buf();

                Some(FileEntry {
                    path: rel_path,
                    size: if meta.is_dir() { 0 } else { meta.len() },
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    is_dir: meta.is_dir(),
                })
            })
            .collect();

        Ok(entries)
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, VfsError> {
        let full_path = self.full_path(path);

        if full_path.is_dir() {
            return Err(VfsError::NotAFile(full_path.display().to_string()));
        }

        let file = fs::File::open(&full_path)?;
        Ok(Box::new(file))
    }

    fn capabilities(&self) -> VfsCapabilities {
        VfsCapabilities::plain()
    }
}
