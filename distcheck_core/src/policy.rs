//! Per-path comparison state machine.
//!
//! Cheap checks run first (existence, size, type) so that a checksum stream is
//! only read when both sides are regular files of equal length. The strategy
//! for content verification follows what the target store reports about the
//! object: a CRC-64 is authoritative, an ETag is only a hint.

use crate::checksum::{ChecksumEngine, ChecksumError, Digest};
use crate::path_mapper::PathMapper;
use distcheck_common::{
    CheckReport, CheckResult, ChecksumAlgorithm, FileMetadata, RemoteDigest, TreePath, Vfs,
};
use tracing::{debug, info, warn};

/// Compares one source path against its counterpart in the target tree
pub struct ComparisonPolicy<'a> {
    source_fs: &'a dyn Vfs,
    target_fs: &'a dyn Vfs,
    engine: ChecksumEngine,
}

/// Where a comparison is up to: the raw input line and the resolved paths
struct Pair<'p> {
    raw: &'p str,
    source: &'p TreePath,
    target: TreePath,
}

impl Pair<'_> {
    fn report(&self, result: CheckResult) -> CheckReport {
        CheckReport::new(self.raw, Some(self.target.to_string()), result)
    }

    fn report_checksums(
        &self,
        algorithm: ChecksumAlgorithm,
        source_checksum: Option<String>,
        target_checksum: Option<String>,
        result: CheckResult,
    ) -> CheckReport {
        CheckReport::with_checksums(
            self.raw,
            self.target.to_string(),
            algorithm,
            source_checksum,
            target_checksum,
            result,
        )
    }
}

impl<'a> ComparisonPolicy<'a> {
    pub fn new(source_fs: &'a dyn Vfs, target_fs: &'a dyn Vfs, engine: ChecksumEngine) -> Self {
        Self {
            source_fs,
            target_fs,
            engine,
        }
    }

    /// Runs the existence, size, type and content checks for `source`.
    ///
    /// `raw` is the trimmed input line recorded as the report's source path.
    /// Every outcome, including I/O failures on either side, becomes a report.
    pub fn check(&self, raw: &str, source: &TreePath, mapper: &PathMapper) -> CheckReport {
        let source_meta = match self.source_fs.metadata(&source.vfs_path()) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                return CheckReport::new(raw, None, CheckResult::SourceFileMissing);
            }
            Err(e) => {
                warn!("Failed to stat source path [{}]: {}", source, e);
                return CheckReport::unchecked(raw);
            }
        };

        let target = match mapper.map(source) {
            Ok(target) => target,
            Err(e) => {
                warn!("{}", e);
                return CheckReport::unchecked(raw);
            }
        };
        info!("The target file path: {}", target);

        let pair = Pair {
            raw,
            source,
            target,
        };

        let target_meta = match self.target_fs.metadata(&pair.target.vfs_path()) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return pair.report(CheckResult::TargetFileMissing),
            Err(e) => {
                warn!("Failed to stat target path [{}]: {}", pair.target, e);
                return pair.report(CheckResult::TargetFilesystemError);
            }
        };

        if let Some(result) = Self::compare_metadata(&source_meta, &target_meta) {
            return pair.report(result);
        }

        self.verify_content(&pair)
    }

    /// Outcome decided by size and type alone, if any
    fn compare_metadata(source: &FileMetadata, target: &FileMetadata) -> Option<CheckResult> {
        if source.size != target.size {
            return Some(CheckResult::Mismatch);
        }
        match (source.is_dir, target.is_dir) {
            (true, true) => Some(CheckResult::Success),
            (true, false) | (false, true) => Some(CheckResult::Mismatch),
            (false, false) => None,
        }
    }

    fn verify_content(&self, pair: &Pair<'_>) -> CheckReport {
        if !self.target_fs.capabilities().extended_status {
            return self.unsupported_target(pair);
        }

        let digest = match self.target_fs.extended_status(&pair.target.vfs_path()) {
            Ok(digest) => digest,
            Err(e) if e.is_not_found() => {
                warn!("Target path [{}] vanished during the check", pair.target);
                return pair.report(CheckResult::TargetFileMissing);
            }
            Err(e) => {
                warn!("Failed to get the extended status of [{}]: {}", pair.target, e);
                return pair.report(CheckResult::TargetFilesystemError);
            }
        };

        match digest {
            RemoteDigest::Crc64(expected) => {
                info!(
                    "Comparing the crc64 between the source file [{}] and the target file [{}]",
                    pair.source, pair.target
                );
                self.verify_with(pair, ChecksumAlgorithm::Crc64, expected.to_string(), |digest| {
                    digest.crc64() == Some(expected)
                })
            }
            RemoteDigest::ETag(tag) => {
                info!(
                    "Comparing the MD5 hash between the source file [{}] and the target file [{}]",
                    pair.source, pair.target
                );
                let expected = tag.clone();
                self.verify_with(pair, ChecksumAlgorithm::Md5, tag, move |digest| {
                    digest.to_string().eq_ignore_ascii_case(&expected)
                })
            }
            RemoteDigest::NoDigest => {
                debug!("Target [{}] reports no digest", pair.target);
                pair.report(CheckResult::Unchecked)
            }
            RemoteDigest::Unsupported => self.unsupported_target(pair),
        }
    }

    fn unsupported_target(&self, pair: &Pair<'_>) -> CheckReport {
        warn!(
            "The target file system [{}] does not report file checksums",
            self.target_fs.instance_id()
        );
        pair.report(CheckResult::TargetFilesystemError)
    }

    /// Streams the source through `algorithm` and compares with `matches`.
    ///
    /// A CRC-64 disagreement is conclusive; an MD5 disagreement against an
    /// ETag only lowers confidence.
    fn verify_with(
        &self,
        pair: &Pair<'_>,
        algorithm: ChecksumAlgorithm,
        target_checksum: String,
        matches: impl Fn(&Digest) -> bool,
    ) -> CheckReport {
        let unchecked = |target_checksum: String| {
            pair.report_checksums(algorithm, None, Some(target_checksum), CheckResult::Unchecked)
        };

        if !ChecksumEngine::is_available(algorithm) {
            warn!("Can not get the {} checksum algorithm", algorithm);
            return unchecked(target_checksum);
        }

        let mut stream = match self.source_fs.open_file(&pair.source.vfs_path()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open source path [{}]: {}", pair.source, e);
                return unchecked(target_checksum);
            }
        };

        let digest = match self.engine.digest_reader(algorithm, &mut stream) {
            Ok(digest) => digest,
            Err(ChecksumError::Unavailable(_)) => return unchecked(target_checksum),
            Err(ChecksumError::Io(e)) => {
                warn!("Failed to read source path [{}]: {}", pair.source, e);
                return unchecked(target_checksum);
            }
        };
        drop(stream);
        debug!("Computed {} {} for {}", algorithm, digest, pair.source);

        let result = match (matches(&digest), algorithm) {
            (true, _) => CheckResult::Success,
            (false, ChecksumAlgorithm::Crc64) => CheckResult::Mismatch,
            (false, ChecksumAlgorithm::Md5) => CheckResult::Unconfirm,
        };
        pair.report_checksums(algorithm, Some(digest.to_string()), Some(target_checksum), result)
    }
}
