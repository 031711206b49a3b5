use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use distcheck_common::{
    FileEntry, FileMetadata, RemoteDigest, S3Settings, Vfs, VfsCapabilities, VfsError,
};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Runtime;
use tracing::debug;

/// S3 connection configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub auth: S3Auth,
    pub endpoint: Option<String>, // For S3-compatible services (COS, MinIO, ...)
    pub path_style: bool,
    /// Response header carrying the store's CRC-64 of an object
    pub crc64_header: Option<String>,
}

/// Authentication method for S3
#[derive(Debug, Clone)]
pub enum S3Auth {
    /// Use AWS credentials from environment variables or IAM role
    Default,
    /// Explicit access key and secret key
    AccessKey {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Anonymous access (public buckets)
    Anonymous,
}

impl S3Config {
    /// Builds the connection for `bucket` from the `[s3]` settings
    pub fn from_settings(bucket: &str, settings: &S3Settings) -> Self {
        let auth = if settings.anonymous {
            S3Auth::Anonymous
        } else {
            match (&settings.access_key_id, &settings.secret_access_key) {
                (Some(id), Some(secret)) => S3Auth::AccessKey {
                    access_key_id: id.clone(),
                    secret_access_key: secret.clone(),
                },
                _ => S3Auth::Default,
            }
        };

        Self {
            bucket: bucket.to_string(),
            region: settings.region.clone(),
            auth,
            endpoint: settings.endpoint.clone(),
            path_style: settings.path_style,
            crc64_header: settings.crc64_header.clone(),
        }
    }
}

/// S3 Virtual File System implementation
///
/// Read-only view of one bucket. `extended_status` reports the CRC-64 header
/// when the store sends one, otherwise the object's ETag.
pub struct S3Vfs {
    instance_id: String,
    config: S3Config,
    client: Arc<Client>,
    runtime: Arc<Runtime>,
}

impl S3Vfs {
    /// Create a new S3 VFS connection
    pub fn new(config: S3Config) -> Result<Self, VfsError> {
        let instance_id = format!("s3://{}/", config.bucket);

        // Create a Tokio runtime for async operations
        let runtime = Runtime::new().map_err(|e| {
            VfsError::Io(std::io::Error::other(format!(
                "Failed to create async runtime: {}",
                e
            )))
        })?;

        let client = runtime.block_on(Self::create_client(&config));

        Ok(Self {
            instance_id,
            config,
            client: Arc::new(client),
            runtime: Arc::new(runtime),
        })
    }

    async fn create_client(config: &S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        match &config.auth {
            S3Auth::Default => {
                // Use default credential chain (env vars, IAM role, etc.)
            }
            S3Auth::AccessKey {
                access_key_id,
                secret_access_key,
            } => {
                let creds = Credentials::new(access_key_id, secret_access_key, None, None, "static");
                loader = loader.credentials_provider(creds);
            }
            S3Auth::Anonymous => {
                loader = loader.no_credentials();
            }
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();
        Client::from_conf(s3_config)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Convert a VFS path to an S3 key
    fn to_s3_key(path: &Path) -> String {
        path.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Ensure directory keys end with /
    fn dir_prefix(key: &str) -> String {
        if key.is_empty() || key.ends_with('/') {
            key.to_string()
        } else {
            format!("{}/", key)
        }
    }

    fn to_system_time(dt: &aws_sdk_s3::primitives::DateTime) -> SystemTime {
        u64::try_from(dt.secs())
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(UNIX_EPOCH)
    }

    fn request_error(action: &str, key: &str, e: impl std::fmt::Display) -> VfsError {
        VfsError::Io(std::io::Error::other(format!(
            "Failed to {} S3 object {}: {}",
            action, key, e
        )))
    }

    /// A key with no object of its own is a directory when anything sits below it
    async fn is_prefix(&self, key: &str) -> Result<bool, VfsError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(Self::dir_prefix(key))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| Self::request_error("list", key, e))?;
        Ok(output.key_count().unwrap_or(0) > 0)
    }

    /// HEAD an object, capturing the CRC-64 header alongside the parsed output
    async fn head(
        &self,
        key: &str,
    ) -> Result<Option<(aws_sdk_s3::operation::head_object::HeadObjectOutput, Option<String>)>, VfsError>
    {
        let captured: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let request = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key);

        let result = match self.config.crc64_header.clone() {
            Some(header) => {
                let slot = Arc::clone(&captured);
                request
                    .customize()
                    .mutate_response(move |response| {
                        if let Some(value) = response.headers().get(header.as_str()) {
                            if let Ok(mut slot) = slot.lock() {
                                *slot = Some(value.to_string());
                            }
                        }
                    })
                    .send()
                    .await
            }
            None => request.send().await,
        };

        match result {
            Ok(output) => {
                let crc = captured.lock().ok().and_then(|mut slot| slot.take());
                Ok(Some((output, crc)))
            }
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => {
                Ok(None)
            }
            Err(e) => Err(Self::request_error("stat", key, e)),
        }
    }
}

impl Vfs for S3Vfs {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, VfsError> {
        let key = Self::to_s3_key(path);
        let dir = FileMetadata {
            size: 0,
            modified: UNIX_EPOCH,
            is_dir: true,
            is_symlink: false,
        };

        if key.is_empty() {
            return Ok(dir);
        }

        self.runtime.block_on(async {
            if let Some((output, _)) = self.head(&key).await? {
                return Ok(FileMetadata {
                    size: output.content_length().unwrap_or(0).max(0) as u64,
                    modified: output
                        .last_modified()
                        .map(Self::to_system_time)
                        .unwrap_or(UNIX_EPOCH),
                    is_dir: false,
                    is_symlink: false,
                });
            }

            if self.is_prefix(&key).await? {
                Ok(dir)
            } else {
                Err(VfsError::NotFound(format!(
                    "s3://{}/{}",
                    self.config.bucket, key
                )))
            }
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileEntry>, VfsError> {
        let prefix = Self::dir_prefix(&Self::to_s3_key(path));

        self.runtime.block_on(async {
            let mut entries = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let mut list_request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.config.bucket)
                    .prefix(&prefix)
                    .delimiter("/");

                if let Some(token) = &continuation_token {
                    list_request = list_request.continuation_token(token);
                }

                let output = list_request
                    .send()
                    .await
                    .map_err(|e| Self::request_error("list", &prefix, e))?;

                for object in output.contents() {
                    if let Some(key) = object.key() {
                        // Skip the directory marker itself
                        if key == prefix {
                            continue;
                        }

                        entries.push(FileEntry {
                            path: PathBuf::from(key.trim_end_matches('/')),
                            size: object.size().unwrap_or(0).max(0) as u64,
                            modified: object
                                .last_modified()
                                .map(Self::to_system_time)
                                .unwrap_or(UNIX_EPOCH),
                            is_dir: key.ends_with('/'),
                        });
                    }
                }

                for common_prefix in output.common_prefixes() {
                    if let Some(prefix_str) = common_prefix.prefix() {
                        entries.push(FileEntry {
                            path: PathBuf::from(prefix_str.trim_end_matches('/')),
                            size: 0,
                            modified: UNIX_EPOCH,
                            is_dir: true,
                        });
                    }
                }

                if output.is_truncated().unwrap_or(false) {
                    continuation_token = output.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }

            Ok(entries)
        })
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, VfsError> {
        let key = Self::to_s3_key(path);

        let body = self.runtime.block_on(async {
            match self
                .client
                .get_object()
                .bucket(&self.config.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(output) => Ok(output.body),
                Err(e) if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) => {
                    Err(VfsError::NotFound(format!(
                        "s3://{}/{}",
                        self.config.bucket, key
                    )))
                }
                Err(e) => Err(Self::request_error("get", &key, e)),
            }
        })?;

        Ok(Box::new(S3Reader {
            runtime: Arc::clone(&self.runtime),
            body,
            chunk: Bytes::new(),
        }))
    }

    fn extended_status(&self, path: &Path) -> Result<RemoteDigest, VfsError> {
        let key = Self::to_s3_key(path);
        if key.is_empty() {
            return Ok(RemoteDigest::NoDigest);
        }

        self.runtime.block_on(async {
            match self.head(&key).await? {
                Some((output, crc)) => {
                    if let Some(digest) = crc.as_deref().and_then(RemoteDigest::crc64_from_decimal) {
                        return Ok(digest);
                    }
                    if let Some(raw) = crc {
                        debug!("Ignoring malformed CRC-64 header on {}: {}", key, raw);
                    }
                    Ok(output
                        .e_tag()
                        .map(RemoteDigest::etag)
                        .unwrap_or(RemoteDigest::NoDigest))
                }
                None if self.is_prefix(&key).await? => Ok(RemoteDigest::NoDigest),
                None => Err(VfsError::NotFound(format!(
                    "s3://{}/{}",
                    self.config.bucket, key
                ))),
            }
        })
    }

    fn capabilities(&self) -> VfsCapabilities {
        VfsCapabilities::object_store()
    }
}

/// Pulls an object body chunk by chunk as it is read
struct S3Reader {
    runtime: Arc<Runtime>,
    body: ByteStream,
    chunk: Bytes,
}

impl Read for S3Reader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.chunk.is_empty() {
            let next = self
                .runtime
                .block_on(self.body.try_next())
                .map_err(|e| std::io::Error::other(format!("Failed to read S3 object body: {}", e)))?;
            match next {
                Some(chunk) => self.chunk = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len());
        let head = self.chunk.split_to(n);
        buf[..n].copy_from_slice(&head);
        Ok(n)
    }
}
