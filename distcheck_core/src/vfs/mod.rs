pub mod local;
pub mod memory;
#[cfg(feature = "cloud")]
pub mod s3;

pub use local::LocalVfs;
pub use memory::{CallCounts, MemoryVfs};
#[cfg(feature = "cloud")]
pub use s3::{S3Auth, S3Config, S3Vfs};
