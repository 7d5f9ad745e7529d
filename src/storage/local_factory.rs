use std::sync::Arc;

use super::{ConfigItem, DriverConfig, DriverFactory, DriverOptions, ListMode, StoragerBox};
use crate::drivers::local;
use crate::error::{Result, StorageError};

pub struct LocalDriverFactory;

impl DriverFactory for LocalDriverFactory {
    fn driver_type(&self) -> &'static str {
        "fs"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            default_list_mode: ListMode::Dir,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![ConfigItem::new("max_append_size", "number")
            .help("Largest size an object may reach through appends (bytes)")]
    }

    fn create_driver(&self, options: DriverOptions) -> Result<StoragerBox> {
        let max_append_size = options.config.get("max_append_size").and_then(|v| v.as_u64());

        // 工作目录必须可用，否则构造失败
        std::fs::create_dir_all(&options.work_dir).map_err(|e| {
            StorageError::invalid_config(format!("fs: work_dir {} is not usable: {}", options.work_dir, e))
        })?;

        tracing::info!("Local driver initialized, work_dir: {}", options.work_dir);

        Ok(Arc::new(local::LocalDriver::new(
            options.work_dir,
            options.list_mode,
            max_append_size,
        )))
    }
}
