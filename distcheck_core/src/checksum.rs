//! Streaming checksums over file content.
//!
//! A stream is read to its end through a fixed-size buffer and only the digest
//! is kept. The digest never depends on the buffer size.

use distcheck_common::{ChecksumAlgorithm, DEFAULT_BUFFER_SIZE};
use std::fmt;
use std::io::{ErrorKind, Read};
use thiserror::Error;

#[cfg(feature = "crc64")]
static CRC64_ECMA: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_XZ);

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("{0} checksum is not available in this build")]
    Unavailable(ChecksumAlgorithm),

    #[error("IO error while reading the stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Final value of a streamed checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digest {
    Crc64(u64),
    Md5([u8; 16]),
}

impl Digest {
    /// CRC-64 value, if this is one
    pub fn crc64(&self) -> Option<u64> {
        match self {
            Digest::Crc64(value) => Some(*value),
            Digest::Md5(_) => None,
        }
    }
}

impl fmt::Display for Digest {
    /// Decimal for CRC-64, lower-case hex for MD5
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Digest::Crc64(value) => write!(f, "{}", value),
            Digest::Md5(bytes) => f.write_str(&hex::encode(bytes)),
        }
    }
}

enum StreamHasher {
    #[cfg(feature = "crc64")]
    Crc64(crc::Digest<'static, u64>),
    #[cfg(feature = "md5")]
    Md5(md5::Md5),
    #[cfg(not(any(feature = "crc64", feature = "md5")))]
    Disabled(std::convert::Infallible),
}

impl StreamHasher {
    fn new(algorithm: ChecksumAlgorithm) -> Result<Self, ChecksumError> {
        match algorithm {
            #[cfg(feature = "crc64")]
            ChecksumAlgorithm::Crc64 => Ok(StreamHasher::Crc64(CRC64_ECMA.digest())),
            #[cfg(feature = "md5")]
            ChecksumAlgorithm::Md5 => {
                use md5::Digest as _;
                Ok(StreamHasher::Md5(md5::Md5::new()))
            }
            #[allow(unreachable_patterns)]
            other => Err(ChecksumError::Unavailable(other)),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            #[cfg(feature = "crc64")]
            StreamHasher::Crc64(digest) => digest.update(data),
            #[cfg(feature = "md5")]
            StreamHasher::Md5(hasher) => {
                use md5::Digest as _;
                hasher.update(data)
            }
            #[cfg(not(any(feature = "crc64", feature = "md5")))]
            StreamHasher::Disabled(never) => match *never {},
        }
    }

    fn finalize(self) -> Digest {
        match self {
            #[cfg(feature = "crc64")]
            StreamHasher::Crc64(digest) => Digest::Crc64(digest.finalize()),
            #[cfg(feature = "md5")]
            StreamHasher::Md5(hasher) => {
                use md5::Digest as _;
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&hasher.finalize());
                Digest::Md5(bytes)
            }
            #[cfg(not(any(feature = "crc64", feature = "md5")))]
            StreamHasher::Disabled(never) => match never {},
        }
    }
}

/// Computes checksums of byte streams with a bounded read buffer
#[derive(Debug, Clone, Copy)]
pub struct ChecksumEngine {
    buffer_size: usize,
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl ChecksumEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether this build can compute `algorithm`
    pub fn is_available(algorithm: ChecksumAlgorithm) -> bool {
        StreamHasher::new(algorithm).is_ok()
    }

    /// Reads `reader` to its end and returns the checksum of everything read
    pub fn digest_reader<R: Read + ?Sized>(
        &self,
        algorithm: ChecksumAlgorithm,
        reader: &mut R,
    ) -> Result<Digest, ChecksumError> {
        let mut hasher = StreamHasher::new(algorithm)?;
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finalize())
    }

    /// Checksum of an in-memory buffer
    pub fn digest_bytes(
        &self,
        algorithm: ChecksumAlgorithm,
        data: &[u8],
    ) -> Result<Digest, ChecksumError> {
        let mut hasher = StreamHasher::new(algorithm)?;
        hasher.update(data);
        Ok(hasher.finalize())
    }
}
