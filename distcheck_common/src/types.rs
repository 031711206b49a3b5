use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// Represents a file or directory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// Metadata for a file or directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Default read buffer for streaming checksums (10 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Default response header carrying an object's CRC-64 on Tencent COS
pub const DEFAULT_CRC64_HEADER: &str = "x-cos-hash-crc64ecma";

/// Report serialization written by the batch runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma-separated report lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// S3-compatible object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services (COS, MinIO, ...)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Response header holding a CRC-64 of the object; `None` disables CRC-64 lookups
    #[serde(default = "default_crc64_header")]
    pub crc64_header: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use unsigned requests (public buckets)
    #[serde(default)]
    pub anonymous: bool,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint` (MinIO)
    #[serde(default)]
    pub path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            crc64_header: default_crc64_header(),
            access_key_id: None,
            secret_access_key: None,
            anonymous: false,
            path_style: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Read buffer used while streaming a file through a checksum
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Worker threads; `None` uses every available core
    #[serde(default)]
    pub threads: Option<usize>,

    /// Reject source paths that do not sit under the source working directory
    #[serde(default = "default_true")]
    pub strict_root: bool,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Ignore patterns applied when generating listings (e.g., "*.tmp", "_temporary/")
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Whether listings follow symbolic links
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,

    #[serde(default)]
    pub s3: S3Settings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            threads: None,
            strict_root: true,
            output_format: OutputFormat::default(),
            ignore_patterns: Vec::new(),
            follow_symlinks: false,
            portable_mode: false,
            s3: S3Settings::default(),
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_crc64_header() -> Option<String> {
    Some(DEFAULT_CRC64_HEADER.to_string())
}

/// Checksum algorithm used to verify a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    #[serde(rename = "CRC64")]
    Crc64,
    #[serde(rename = "MD5")]
    Md5,
}

impl ChecksumAlgorithm {
    pub const fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc64 => "CRC64",
            ChecksumAlgorithm::Md5 => "MD5",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of checking one source path against the target tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckResult {
    /// Content verified identical
    Success,
    /// Sizes, types or an authoritative checksum disagree
    Mismatch,
    /// A low-confidence digest (ETag) disagrees
    Unconfirm,
    /// No verification could be performed
    #[default]
    Unchecked,
    SourceFileMissing,
    TargetFileMissing,
    TargetFilesystemError,
}

impl CheckResult {
    pub const ALL: [CheckResult; 7] = [
        CheckResult::Success,
        CheckResult::Mismatch,
        CheckResult::Unconfirm,
        CheckResult::Unchecked,
        CheckResult::SourceFileMissing,
        CheckResult::TargetFileMissing,
        CheckResult::TargetFilesystemError,
    ];

    /// Stable upper-case name written into reports
    pub const fn name(self) -> &'static str {
        match self {
            CheckResult::Success => "SUCCESS",
            CheckResult::Mismatch => "MISMATCH",
            CheckResult::Unconfirm => "UNCONFIRM",
            CheckResult::Unchecked => "UNCHECKED",
            CheckResult::SourceFileMissing => "SOURCE_FILE_MISSING",
            CheckResult::TargetFileMissing => "TARGET_FILE_MISSING",
            CheckResult::TargetFilesystemError => "TARGET_FILESYSTEM_ERROR",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            CheckResult::Success => "The source file and the target file are the same.",
            CheckResult::Mismatch => "The source file and target file are different.",
            CheckResult::Unconfirm => {
                "Can not confirm if the source file and the target file are the same."
            }
            CheckResult::Unchecked => {
                "The source file is inaccessible or its checksum could not be computed."
            }
            CheckResult::SourceFileMissing => "The source file is missing.",
            CheckResult::TargetFileMissing => "The target file is missing.",
            CheckResult::TargetFilesystemError => "The target file system is error.",
        }
    }

    /// Looks a result up by its report name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_names_round_trip() {
        for result in CheckResult::ALL {
            assert_eq!(CheckResult::from_name(result.name()), Some(result));
        }
        assert_eq!(CheckResult::from_name("success"), None);
    }

    #[test]
    fn test_check_result_default_is_unchecked() {
        assert_eq!(CheckResult::default(), CheckResult::Unchecked);
    }

    #[test]
    fn test_app_config_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.strict_root);
        assert_eq!(config.output_format, OutputFormat::Text);
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.s3.crc64_header.as_deref(), Some(DEFAULT_CRC64_HEADER));
    }

    #[test]
    fn test_app_config_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            threads = 4
            strict_root = false
            output_format = "json"

            [s3]
            endpoint = "https://cos.ap-guangzhou.myqcloud.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.threads, Some(4));
        assert!(!config.strict_root);
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.s3.endpoint.as_deref(), Some("https://cos.ap-guangzhou.myqcloud.com"));
        assert_eq!(config.s3.region, "us-east-1");
    }

    #[test]
    fn test_check_result_serde_uses_report_names() {
        let json = serde_json::to_string(&CheckResult::TargetFilesystemError).unwrap();
        assert_eq!(json, "\"TARGET_FILESYSTEM_ERROR\"");
        let json = serde_json::to_string(&ChecksumAlgorithm::Crc64).unwrap();
        assert_eq!(json, "\"CRC64\"");
    }
}
