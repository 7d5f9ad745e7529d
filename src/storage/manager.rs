use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::pairs::{parse_connection_string, Pairs};
use super::{get_common_items, ConfigItem, DriverConfig, DriverInfo, ListMode, Storager};
use crate::error::{Result, StorageError};
use crate::utils::normalize_work_dir;

pub type StoragerBox = Arc<dyn Storager>;

/// Options handed to a factory after validation / 校验后的驱动参数
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Normalized working directory / 工作目录
    pub work_dir: String,
    pub list_mode: ListMode,
    /// Driver-specific options typed per `ConfigItem::item_type` / 驱动特有配置
    pub config: Value,
}

/// Driver factory trait / 驱动工厂 trait
pub trait DriverFactory: Send + Sync {
    /// Driver type name, also the connection string scheme / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// Create driver instance / 创建驱动实例
    fn create_driver(&self, options: DriverOptions) -> Result<StoragerBox>;

    /// Return driver basic config / 返回驱动基本配置
    fn driver_config(&self) -> DriverConfig;

    /// Return driver specific config items / 返回驱动特有配置项
    fn additional_items(&self) -> Vec<ConfigItem>;

    /// Generate complete driver info (auto merge common + additional) / 生成完整的驱动信息
    fn driver_info(&self) -> DriverInfo {
        let config = self.driver_config();
        let common = get_common_items(&config);
        let additional = self.additional_items();
        DriverInfo { common, additional, config }
    }
}

/// Storage manager (factories and named handles) / 存储管理器
#[derive(Clone, Default)]
pub struct StorageManager {
    drivers: Arc<RwLock<HashMap<String, StoragerBox>>>,
    factories: Arc<RwLock<HashMap<String, Arc<dyn DriverFactory>>>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with every bundled driver registered / 注册全部内置驱动
    pub fn with_builtin_drivers() -> Self {
        let manager = Self::new();
        crate::drivers::register_all(&manager);
        manager
    }

    /// Register driver factory / 注册驱动工厂
    pub fn register_factory(&self, factory: Arc<dyn DriverFactory>) {
        let driver_type = factory.driver_type().to_string();
        self.factories.write().insert(driver_type.clone(), factory);
        tracing::debug!("Driver factory registered: {}", driver_type);
    }

    /// Construct a handle from structured options / 根据配置构造存储实例
    ///
    /// Unknown options and missing required options fail with `InvalidConfig`;
    /// no handle is produced in that case.
    pub fn new_storager(&self, driver_type: &str, pairs: &Pairs) -> Result<StoragerBox> {
        let factory = self
            .factories
            .read()
            .get(driver_type)
            .cloned()
            .ok_or_else(|| StorageError::invalid_config(format!("Driver type not found: {}", driver_type)))?;

        let options = validate_options(factory.as_ref(), pairs)?;
        let store = factory.create_driver(options)?;

        tracing::info!(
            "Storager created: {} (work_dir={}, capabilities={:?})",
            driver_type,
            store.work_dir(),
            store.capabilities().supported()
        );
        Ok(store)
    }

    /// Construct a handle from `scheme://name/work_dir?key=value` / 根据连接字符串构造
    pub fn new_storager_from_string(&self, conn: &str) -> Result<StoragerBox> {
        let (scheme, pairs) = parse_connection_string(conn)?;
        self.new_storager(&scheme, &pairs)
    }

    /// Create and keep a named handle / 创建并保存命名实例
    pub fn create_driver(&self, id: &str, driver_type: &str, pairs: &Pairs) -> Result<StoragerBox> {
        match self.new_storager(driver_type, pairs) {
            Ok(store) => {
                self.drivers.write().insert(id.to_string(), store.clone());
                Ok(store)
            }
            Err(e) => {
                tracing::error!("Driver creation failed: {} ({}) - {}", id, driver_type, e);
                Err(e)
            }
        }
    }

    /// Get driver instance / 获取驱动实例
    pub fn get_driver(&self, id: &str) -> Option<StoragerBox> {
        self.drivers.read().get(id).cloned()
    }

    /// Remove driver instance / 移除驱动实例
    pub fn remove_driver(&self, id: &str) -> Result<()> {
        self.drivers
            .write()
            .remove(id)
            .ok_or_else(|| StorageError::invalid_config(format!("Driver not found: {}", id)))?;
        tracing::info!("Driver removed: {}", id);
        Ok(())
    }

    /// List all named drivers / 列出所有驱动
    pub fn list_drivers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.drivers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// List all available driver types / 列出所有可用的驱动类型
    pub fn list_driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

/// Check `pairs` against the factory's declared items / 校验配置项
fn validate_options(factory: &dyn DriverFactory, pairs: &Pairs) -> Result<DriverOptions> {
    let info = factory.driver_info();
    let driver_type = factory.driver_type();

    for key in pairs.keys() {
        let known = info.common.iter().chain(info.additional.iter()).any(|item| &item.name == key);
        if !known {
            return Err(StorageError::invalid_config(format!("{}: unknown option {}", driver_type, key)));
        }
    }

    let work_dir = pairs
        .get("work_dir")
        .map(|w| normalize_work_dir(w))
        .unwrap_or_else(|| "/".to_string());
    let list_mode = match pairs.get("list_mode") {
        Some(mode) => mode.parse::<ListMode>()?,
        None => info.config.default_list_mode,
    };

    let mut config = Map::new();
    for item in &info.additional {
        let raw = match (pairs.get(&item.name), &item.default) {
            (Some(v), _) => v.clone(),
            (None, Some(default)) => default.clone(),
            (None, None) if item.required => {
                return Err(StorageError::invalid_config(format!(
                    "{}: missing required option {}",
                    driver_type, item.name
                )));
            }
            (None, None) => continue,
        };
        if item.required && raw.is_empty() {
            return Err(StorageError::invalid_config(format!(
                "{}: required option {} is empty",
                driver_type, item.name
            )));
        }
        config.insert(item.name.clone(), typed_value(driver_type, item, &raw)?);
    }

    Ok(DriverOptions {
        work_dir,
        list_mode,
        config: Value::Object(config),
    })
}

fn typed_value(driver_type: &str, item: &ConfigItem, raw: &str) -> Result<Value> {
    let invalid = || {
        StorageError::invalid_config(format!(
            "{}: option {} expects a {}, got {:?}",
            driver_type, item.name, item.item_type, raw
        ))
    };

    match item.item_type.as_str() {
        "number" => raw.parse::<u64>().map(Value::from).map_err(|_| invalid()),
        "bool" => raw.parse::<bool>().map(Value::Bool).map_err(|_| invalid()),
        _ => Ok(Value::String(raw.to_string())),
    }
}
