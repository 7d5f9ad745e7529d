// Driver package / 驱动包
pub mod google_drive;
pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use crate::storage::StorageManager;

/// Register all drivers to StorageManager / 注册所有驱动
pub fn register_all(manager: &StorageManager) {
    // Register local driver (using LocalDriverFactory from storage module) / 注册本地驱动
    manager.register_factory(Arc::new(crate::storage::LocalDriverFactory));
    // Register in-memory driver / 注册内存驱动
    manager.register_factory(Arc::new(memory::MemoryDriverFactory));
    // Register S3 driver / 注册S3对象存储驱动
    manager.register_factory(Arc::new(s3::S3DriverFactory));
    // Register MinIO driver (path-style S3) / 注册MinIO驱动
    manager.register_factory(Arc::new(s3::MinioDriverFactory));
    // Register Google Drive driver / 注册Google Drive驱动
    manager.register_factory(Arc::new(google_drive::GoogleDriveDriverFactory));
}
