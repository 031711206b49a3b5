use distcheck_common::TreePath;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathMapError {
    #[error("The source path [{path}] is not under the source working directory [{root}].")]
    OutsideRoot { path: String, root: String },
}

/// Translates source-tree paths into target-tree paths.
///
/// Roots are fixed at construction and only read afterwards, so one mapper is
/// shared by every worker of a batch.
#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: TreePath,
    target_root: TreePath,
    strict: bool,
}

impl PathMapper {
    pub fn new(source_root: TreePath, target_root: TreePath) -> Self {
        Self {
            source_root,
            target_root,
            strict: true,
        }
    }

    /// In lenient mode a path outside the source root is appended whole to the
    /// target root instead of being rejected.
    pub fn with_strict_root(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn source_root(&self) -> &TreePath {
        &self.source_root
    }

    pub fn target_root(&self) -> &TreePath {
        &self.target_root
    }

    /// Maps `source` to its counterpart under the target root.
    ///
    /// Only hierarchical components are compared; the result always carries
    /// the target root's scheme and authority.
    pub fn map(&self, source: &TreePath) -> Result<TreePath, PathMapError> {
        let segments = source.segments();
        let root = self.source_root.segments();

        // Ancestors of the source, nearest first, down to (but excluding) `/`.
        let matched = (1..segments.len()).rev().find(|&len| segments[..len] == *root);

        // The root itself has no matching ancestor and is joined whole, like
        // any unmatched path; strict mode only rejects paths outside it.
        let target = match matched {
            Some(len) => self.target_root.join(segments[len..].iter().cloned()),
            None if self.strict && segments != root && !self.source_root.is_root() => {
                return Err(PathMapError::OutsideRoot {
                    path: source.to_string(),
                    root: self.source_root.to_string(),
                });
            }
            None => self.target_root.join(segments.iter().cloned()),
        };

        let target = target.qualified_with(&self.target_root);
        debug!("Mapped {} -> {}", source, target);
        Ok(target)
    }
}
