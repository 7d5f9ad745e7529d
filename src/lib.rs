//! Uniform storage interface with capability negotiation and a server-tracked
//! append protocol / 统一存储接口
//!
//! Backends are constructed through [`StorageManager`] from structured options
//! or from a `scheme://name/work_dir?key=value` connection string.

pub mod config;
pub mod error;
pub mod fswrap;
pub mod storage;
pub mod utils;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

#[cfg(test)]
mod testing;

pub use error::{ErrorKind, Result, StorageError};
pub use fswrap::{DirEntry, FileInfo, FileType, FsFile, FsView};
pub use storage::{
    Appender, Capability, CapabilityKind, CreateAppendPolicy, DirLister, Globber, ListMode, ObjectDescriptor,
    ObjectMode, Pairs, StorageManager, Storager, StoragerBox,
};

/// Construct a handle with the built-in drivers / 使用内置驱动构造存储实例
pub fn new_storager(driver_type: &str, pairs: &Pairs) -> Result<StoragerBox> {
    StorageManager::with_builtin_drivers().new_storager(driver_type, pairs)
}

/// Construct a handle from a connection string / 从连接字符串构造存储实例
pub fn new_storager_from_string(conn: &str) -> Result<StoragerBox> {
    StorageManager::with_builtin_drivers().new_storager_from_string(conn)
}
