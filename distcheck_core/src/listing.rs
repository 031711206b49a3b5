//! Generates the file listing that feeds a check batch.
//!
//! Local trees are walked in parallel with jwalk; any other tree is walked
//! through [`Vfs::read_dir`]. Each listed entry is rendered as a path
//! qualified with the tree root's scheme and authority.

use distcheck_common::{AppConfig, DistCheckError, FileEntry, TreePath, Vfs, VfsError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;
use std::path::{Component, Path};
use std::time::SystemTime;
use tracing::{debug, info};

/// Recursive tree lister honoring ignore patterns
pub struct TreeLister {
    ignore: Option<Gitignore>,
    follow_symlinks: bool,
    files_only: bool,
}

impl TreeLister {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            ignore: Self::build_ignore(&config.ignore_patterns),
            follow_symlinks: config.follow_symlinks,
            files_only: false,
        }
    }

    /// Leave directories out of the listing (they are still descended into)
    pub fn with_files_only(mut self, files_only: bool) -> Self {
        self.files_only = files_only;
        self
    }

    /// Build a Gitignore from the configured ignore patterns
    fn build_ignore(patterns: &[String]) -> Option<Gitignore> {
        if patterns.is_empty() {
            return None;
        }

        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            if let Err(err) = builder.add_line(None, pattern) {
                debug!("Failed to add ignore pattern '{}': {}", pattern, err);
            }
        }

        match builder.build() {
            Ok(ignore) => Some(ignore),
            Err(e) => {
                debug!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Walks a local directory; entry paths are relative to `dir`
    pub fn scan_local(&self, dir: &Path) -> Result<Vec<FileEntry>, DistCheckError> {
        let mut entries = Vec::new();

        let walker = WalkDir::new(dir)
            .follow_links(self.follow_symlinks)
            .skip_hidden(false)
            .sort(true);

        for entry in walker {
            let entry = entry
                .map_err(|e| DistCheckError::Io(std::io::Error::other(format!("Walk error: {}", e))))?;

            let path = entry.path();
            let relative_path = path
                .strip_prefix(dir)
                .map_err(|e| DistCheckError::Path(e.to_string()))?
                .to_path_buf();

            // Skip the synthetic root entry (empty path)
            if relative_path.as_os_str().is_empty() {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            if self.is_ignored(&relative_path, is_dir) {
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| DistCheckError::Io(std::io::Error::other(format!("Metadata error: {}", e))))?;

            entries.push(FileEntry {
                path: relative_path,
                size: if is_dir { 0 } else { metadata.len() },
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                is_dir,
            });
        }

        debug!("Scanned {} entries from {:?}", entries.len(), dir);
        Ok(entries)
    }

    /// Walks `root` (relative to the VFS root) through `read_dir`
    pub fn scan_vfs(&self, vfs: &dyn Vfs, root: &Path) -> Result<Vec<FileEntry>, DistCheckError> {
        if !vfs.capabilities().list {
            return Err(VfsError::Unsupported(format!("{} can not be listed", vfs.instance_id())).into());
        }

        let mut entries = Vec::new();
        self.scan_vfs_recursive(vfs, root, root, &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn scan_vfs_recursive(
        &self,
        vfs: &dyn Vfs,
        root: &Path,
        current: &Path,
        entries: &mut Vec<FileEntry>,
    ) -> Result<(), DistCheckError> {
        for entry in vfs.read_dir(current)? {
            let vfs_path = entry.path.clone();
            let relative_path = vfs_path.strip_prefix(root).unwrap_or(&vfs_path).to_path_buf();

            if relative_path.as_os_str().is_empty() {
                continue;
            }

            if self.is_ignored(&relative_path, entry.is_dir) {
                continue;
            }

            let is_dir = entry.is_dir;
            entries.push(FileEntry {
                path: relative_path,
                ..entry
            });

            if is_dir {
                self.scan_vfs_recursive(vfs, root, &vfs_path, entries)?;
            }
        }

        Ok(())
    }

    /// Listing of the tree at `root` as qualified paths, sorted.
    ///
    /// `local_dir` is the on-disk directory behind `root` when the tree is local.
    pub fn list(
        &self,
        vfs: &dyn Vfs,
        root: &TreePath,
        local_dir: Option<&Path>,
    ) -> Result<Vec<TreePath>, DistCheckError> {
        let entries = match local_dir {
            Some(dir) => self.scan_local(dir)?,
            None => self.scan_vfs(vfs, &root.vfs_path())?,
        };

        let listed: Vec<TreePath> = entries
            .iter()
            .filter(|entry| !(self.files_only && entry.is_dir))
            .map(|entry| root.join(components(&entry.path)))
            .collect();

        info!("Listed {} paths under {}", listed.len(), root);
        Ok(listed)
    }

    /// Check if a path or any of its parent directories should be ignored
    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(ignore) = &self.ignore else {
            return false;
        };

        if ignore.matched(path, is_dir).is_ignore() {
            return true;
        }

        let mut current = path;
        while let Some(parent) = current.parent() {
            if !parent.as_os_str().is_empty() && ignore.matched(parent, true).is_ignore() {
                return true;
            }
            current = parent;
        }
        false
    }
}

fn components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}
