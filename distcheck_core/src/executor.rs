use crate::checksum::ChecksumEngine;
use crate::path_mapper::PathMapper;
use crate::policy::ComparisonPolicy;
use distcheck_common::{CheckReport, DistCheckError, TreePath, Vfs};
use tracing::{info, warn};

/// The two tree roots of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirs {
    pub source: TreePath,
    pub target: TreePath,
}

impl WorkingDirs {
    pub fn new(source: TreePath, target: TreePath) -> Self {
        Self { source, target }
    }

    /// Parses both roots from their textual form
    pub fn parse(source: &str, target: &str) -> Result<Self, DistCheckError> {
        let source = TreePath::parse(source)
            .map_err(|e| DistCheckError::WorkingDir(format!("source work dir: {}", e)))?;
        let target = TreePath::parse(target)
            .map_err(|e| DistCheckError::WorkingDir(format!("target work dir: {}", e)))?;
        if !source.is_absolute() || !target.is_absolute() {
            return Err(DistCheckError::WorkingDir(
                "work dirs must be absolute paths".to_string(),
            ));
        }
        Ok(Self::new(source, target))
    }

    /// Both roots must exist before any check runs
    pub fn validate(&self, source_fs: &dyn Vfs, target_fs: &dyn Vfs) -> Result<(), DistCheckError> {
        Self::validate_root("source", &self.source, source_fs)?;
        Self::validate_root("target", &self.target, target_fs)
    }

    fn validate_root(side: &str, root: &TreePath, fs: &dyn Vfs) -> Result<(), DistCheckError> {
        match fs.metadata(&root.vfs_path()) {
            Ok(meta) if meta.is_dir => Ok(()),
            Ok(_) => Err(DistCheckError::WorkingDir(format!(
                "the {} work dir [{}] is not a directory",
                side, root
            ))),
            Err(e) if e.is_not_found() => Err(DistCheckError::WorkingDir(format!(
                "the {} work dir [{}] does not exist",
                side, root
            ))),
            Err(e) => Err(DistCheckError::WorkingDir(format!(
                "can not access the {} work dir [{}]: {}",
                side, root, e
            ))),
        }
    }
}

/// Turns one input line into exactly one report.
///
/// Holds only shared references and immutable roots, so a single executor
/// serves every worker thread of a batch.
pub struct CheckExecutor<'a> {
    dirs: &'a WorkingDirs,
    mapper: PathMapper,
    policy: ComparisonPolicy<'a>,
}

impl<'a> CheckExecutor<'a> {
    pub fn new(
        dirs: &'a WorkingDirs,
        source_fs: &'a dyn Vfs,
        target_fs: &'a dyn Vfs,
        engine: ChecksumEngine,
    ) -> Self {
        info!(
            "Checking {} ({}) against {} ({})",
            dirs.source,
            source_fs.instance_id(),
            dirs.target,
            target_fs.instance_id()
        );
        Self {
            dirs,
            mapper: PathMapper::new(dirs.source.clone(), dirs.target.clone()),
            policy: ComparisonPolicy::new(source_fs, target_fs, engine),
        }
    }

    /// Reject (default) or re-root source paths that are not under the source root
    pub fn with_strict_root(mut self, strict: bool) -> Self {
        self.mapper = self.mapper.with_strict_root(strict);
        self
    }

    pub fn working_dirs(&self) -> &WorkingDirs {
        self.dirs
    }

    /// Checks one raw input line
    pub fn check_line(&self, line: &str) -> CheckReport {
        let raw = line.trim();

        let source = match self.validate_input(raw) {
            Ok(source) => source,
            Err(e) => {
                warn!("Check input path [{}] failed: {}", raw, e);
                return CheckReport::unchecked(raw);
            }
        };

        self.policy.check(raw, &source, &self.mapper)
    }

    fn validate_input(&self, raw: &str) -> Result<TreePath, DistCheckError> {
        let input = TreePath::parse(raw)?;
        let source = input.resolve_against(&self.dirs.source);
        if !source.same_filesystem(&self.dirs.source) {
            return Err(DistCheckError::Path(format!(
                "the source path [{}] does not belong to the file system of [{}]",
                raw, self.dirs.source
            )));
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryVfs;
    use distcheck_common::{CheckResult, ChecksumAlgorithm, RemoteDigest};

    fn dirs(source: &str, target: &str) -> WorkingDirs {
        WorkingDirs::parse(source, target).unwrap()
    }

    #[test]
    fn test_working_dirs_validation() {
        let source = MemoryVfs::new("src");
        source.add_dir("src");
        let target = MemoryVfs::object_store("dst");
        target.add_file("dst", "not a dir");

        assert!(dirs("/src", "/nope").validate(&source, &target).is_err());
        assert!(matches!(
            dirs("/missing", "/dst").validate(&source, &target),
            Err(DistCheckError::WorkingDir(_))
        ));
        assert!(dirs("/src", "/dst").validate(&source, &target).is_err());

        target.add_dir("other");
        assert!(dirs("/src", "/other").validate(&source, &target).is_ok());
    }

    #[test]
    fn test_working_dirs_must_be_absolute() {
        assert!(WorkingDirs::parse("src", "/dst").is_err());
        assert!(WorkingDirs::parse("/src", "").is_err());
        assert!(WorkingDirs::parse("hdfs://nn:8020/src", "cosn://bucket/dst").is_ok());
    }

    #[test]
    fn test_empty_line_is_unchecked() {
        let source = MemoryVfs::new("src");
        let target = MemoryVfs::object_store("dst");
        let dirs = dirs("/src", "/dst");
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        for line in ["", "   ", "\t"] {
            let report = executor.check_line(line);
            assert_eq!(report.result(), CheckResult::Unchecked);
            assert_eq!(
                report.to_string(),
                ",None,None,None,None,UNCHECKED,'The source file is inaccessible or its checksum could not be computed.'"
            );
        }
        assert_eq!(source.calls().metadata(), 0);
    }

    #[test]
    fn test_foreign_filesystem_is_unchecked() {
        let source = MemoryVfs::new("src");
        source.add_file("data/f", "x");
        let target = MemoryVfs::object_store("dst");
        let dirs = dirs("hdfs://nn:8020/data", "cosn://bucket/data");
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        for line in ["hdfs://other:8020/data/f", "s3://nn:8020/data/f", "file:///data/f"] {
            let report = executor.check_line(line);
            assert_eq!(report.result(), CheckResult::Unchecked, "{}", line);
            assert_eq!(report.target_path(), None);
        }
        assert_eq!(source.calls().metadata(), 0);
    }

    #[test]
    fn test_scheme_less_and_relative_inputs_resolve_against_source_root() {
        let source = MemoryVfs::new("src");
        source.add_file("data/a/f", "x");
        let target = MemoryVfs::object_store("dst");
        let dirs = dirs("hdfs://nn:8020/data", "cosn://bucket/backup");
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let report = executor.check_line("  /data/a/f  ");
        assert_eq!(report.source_path(), "/data/a/f");
        assert_eq!(report.result(), CheckResult::TargetFileMissing);
        assert_eq!(report.target_path(), Some("cosn://bucket/backup/a/f"));

        let report = executor.check_line("a/f");
        assert_eq!(report.target_path(), Some("cosn://bucket/backup/a/f"));
    }

    #[test]
    fn test_lenient_root_maps_outside_paths() {
        let source = MemoryVfs::new("src");
        source.add_file("other/f", "x");
        let target = MemoryVfs::object_store("dst");
        let dirs = dirs("/src", "/dst");

        let strict = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());
        assert_eq!(strict.check_line("/other/f").target_path(), None);

        let lenient = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default())
            .with_strict_root(false);
        let report = lenient.check_line("/other/f");
        assert_eq!(report.result(), CheckResult::TargetFileMissing);
        assert_eq!(report.target_path(), Some("/dst/other/f"));
    }

    #[test]
    fn test_parent_segments_do_not_escape_source_root() {
        let source = MemoryVfs::new("src");
        source.add_dir("src");
        source.add_file("secret/f", "x");
        let target = MemoryVfs::object_store("dst");
        target.add_file("secret/f", "x");
        let dirs = dirs("/src", "/dst");
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let report = executor.check_line("/src/../secret/f");
        assert_eq!(report.result(), CheckResult::Unchecked);
        assert_eq!(report.source_path(), "/src/../secret/f");
        assert_eq!(report.target_path(), None);
        assert_eq!(target.calls().metadata(), 0);
    }

    #[test]
    fn test_source_root_itself_is_joined_under_target_root() {
        let source = MemoryVfs::new("src");
        source.add_dir("src");
        let target = MemoryVfs::object_store("dst");
        target.add_dir("dst");
        let dirs = dirs("/src", "/dst");
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let report = executor.check_line("/src");
        assert_eq!(report.target_path(), Some("/dst/src"));
        assert_eq!(report.result(), CheckResult::TargetFileMissing);
    }

    #[test]
    fn test_checks_are_idempotent() {
        let source = MemoryVfs::new("src");
        source.add_file("src/a", "hello");
        source.add_file("src/b", "hello!");
        source.add_file("src/c", "abc");
        let target = MemoryVfs::object_store("dst");
        target.add_file_with_digest(
            "dst/a",
            "hello",
            RemoteDigest::etag("\"5d41402abc4b2a76b9719d911017c592\""),
        );
        target.add_file("dst/b", "hello");
        let dirs = dirs("/src", "/dst");
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::new(2));

        let lines = ["/src/a", "/src/b", "/src/c", "", "/src/missing"];
        let first: Vec<String> = lines.iter().map(|l| executor.check_line(l).to_string()).collect();
        let second: Vec<String> = lines.iter().map(|l| executor.check_line(l).to_string()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), lines.len());

        if ChecksumEngine::is_available(ChecksumAlgorithm::Md5) {
            assert!(first[0].contains(",MD5,"));
            assert!(first[0].contains(",SUCCESS,"));
        }
        assert!(first[1].contains(",MISMATCH,"));
        assert!(first[2].contains(",TARGET_FILE_MISSING,"));
        assert!(first[4].contains(",SOURCE_FILE_MISSING,"));
    }
}
