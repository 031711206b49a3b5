pub mod batch;
pub mod checksum;
pub mod executor;
pub mod listing;
pub mod path_mapper;
pub mod policy;
pub mod vfs;

pub use batch::{BatchRunner, BatchSummary, ReportSink, ReportWriter};
pub use checksum::{ChecksumEngine, ChecksumError, Digest};
pub use executor::{CheckExecutor, WorkingDirs};
pub use listing::TreeLister;
pub use path_mapper::{PathMapError, PathMapper};
pub use policy::ComparisonPolicy;
pub use vfs::{LocalVfs, MemoryVfs};
#[cfg(feature = "cloud")]
pub use vfs::S3Vfs;
