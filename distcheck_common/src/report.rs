use crate::{CheckResult, ChecksumAlgorithm, DistCheckError};
use serde::{Serialize, Serializer};
use std::fmt;

/// Literal written for absent report fields
pub const NONE_FIELD: &str = "None";

/// Terminal result of checking one source path.
///
/// Built once by the executor and never mutated; the text form is a single
/// comma-separated line:
///
/// `sourcePath,targetPath,algorithm,sourceChecksum,targetChecksum,RESULT,'description'`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckReport {
    source_path: String,
    target_path: Option<String>,
    algorithm: Option<ChecksumAlgorithm>,
    source_checksum: Option<String>,
    target_checksum: Option<String>,
    result: CheckResult,
}

impl CheckReport {
    /// Report carrying only paths, for outcomes decided without checksums
    pub fn new(
        source_path: impl Into<String>,
        target_path: Option<String>,
        result: CheckResult,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_path,
            result,
            ..Default::default()
        }
    }

    /// Report for an input rejected before any path mapping
    pub fn unchecked(source_path: impl Into<String>) -> Self {
        Self::new(source_path, None, CheckResult::Unchecked)
    }

    /// Report for a checksum comparison
    pub fn with_checksums(
        source_path: impl Into<String>,
        target_path: impl Into<String>,
        algorithm: ChecksumAlgorithm,
        source_checksum: Option<String>,
        target_checksum: Option<String>,
        result: CheckResult,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: Some(target_path.into()),
            algorithm: Some(algorithm),
            source_checksum,
            target_checksum,
            result,
        }
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn target_path(&self) -> Option<&str> {
        self.target_path.as_deref()
    }

    pub fn algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.algorithm
    }

    pub fn source_checksum(&self) -> Option<&str> {
        self.source_checksum.as_deref()
    }

    pub fn target_checksum(&self) -> Option<&str> {
        self.target_checksum.as_deref()
    }

    pub fn result(&self) -> CheckResult {
        self.result
    }

    /// Single-line JSON rendering, absent fields as `null`
    pub fn to_json_line(&self) -> Result<String, DistCheckError> {
        serde_json::to_string(self).map_err(|e| DistCheckError::Serialization(e.to_string()))
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},'{}'",
            sanitize(&self.source_path),
            field(self.target_path.as_deref()),
            field(self.algorithm.map(ChecksumAlgorithm::name)),
            field(self.source_checksum.as_deref()),
            field(self.target_checksum.as_deref()),
            self.result.name(),
            self.result.description()
        )
    }
}

#[derive(Serialize)]
struct ReportJson<'a> {
    source_path: &'a str,
    target_path: Option<&'a str>,
    algorithm: Option<ChecksumAlgorithm>,
    source_checksum: Option<&'a str>,
    target_checksum: Option<&'a str>,
    result: CheckResult,
    description: &'static str,
}

impl Serialize for CheckReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportJson {
            source_path: &self.source_path,
            target_path: self.target_path.as_deref(),
            algorithm: self.algorithm,
            source_checksum: self.source_checksum.as_deref(),
            target_checksum: self.target_checksum.as_deref(),
            result: self.result,
            description: self.result.description(),
        }
        .serialize(serializer)
    }
}

fn field(value: Option<&str>) -> String {
    value.map(sanitize).unwrap_or_else(|| NONE_FIELD.to_string())
}

/// Escapes line breaks so a record always stays on one line
pub fn sanitize(value: &str) -> String {
    if !value.contains(|c: char| c == '\n' || c == '\r') {
        return value.to_string();
    }
    value.replace('\r', "\\r").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_missing_line() {
        let report = CheckReport::new(
            "/src/a/b.txt",
            Some("/dst/a/b.txt".to_string()),
            CheckResult::TargetFileMissing,
        );
        assert_eq!(
            report.to_string(),
            "/src/a/b.txt,/dst/a/b.txt,None,None,None,TARGET_FILE_MISSING,'The target file is missing.'"
        );
    }

    #[test]
    fn test_unchecked_empty_input() {
        let report = CheckReport::unchecked("");
        assert_eq!(
            report.to_string(),
            ",None,None,None,None,UNCHECKED,'The source file is inaccessible or its checksum could not be computed.'"
        );
        assert_eq!(report, CheckReport::default());
    }

    #[test]
    fn test_checksum_line() {
        let report = CheckReport::with_checksums(
            "/src/a",
            "cosn://bucket/dst/a",
            ChecksumAlgorithm::Crc64,
            Some("123456789".to_string()),
            Some("123456789".to_string()),
            CheckResult::Success,
        );
        assert_eq!(
            report.to_string(),
            "/src/a,cosn://bucket/dst/a,CRC64,123456789,123456789,SUCCESS,'The source file and the target file are the same.'"
        );
    }

    #[test]
    fn test_newlines_are_escaped() {
        let report = CheckReport::new(
            "/src/bad\nname",
            Some("/dst/bad\r\nname".to_string()),
            CheckResult::SourceFileMissing,
        );
        let line = report.to_string();
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert!(line.starts_with("/src/bad\\nname,/dst/bad\\r\\nname,"));
    }

    #[test]
    fn test_json_line() {
        let report = CheckReport::with_checksums(
            "/src/a",
            "/dst/a",
            ChecksumAlgorithm::Md5,
            Some("abc".to_string()),
            Some("ABD".to_string()),
            CheckResult::Unconfirm,
        );
        let value: serde_json::Value = serde_json::from_str(&report.to_json_line().unwrap()).unwrap();
        assert_eq!(value["source_path"], "/src/a");
        assert_eq!(value["algorithm"], "MD5");
        assert_eq!(value["result"], "UNCONFIRM");
        assert_eq!(value["description"], CheckResult::Unconfirm.description());

        let missing = CheckReport::unchecked("x").to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&missing).unwrap();
        assert!(value["target_path"].is_null());
        assert!(value["algorithm"].is_null());
    }
}
