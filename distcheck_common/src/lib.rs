pub mod config;
pub mod error;
pub mod path;
pub mod report;
pub mod types;
pub mod vfs;

pub use config::*;
pub use error::*;
pub use path::*;
pub use report::*;
pub use types::*;
pub use vfs::*;
