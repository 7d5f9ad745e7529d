//! Application configuration module / 应用配置模块
//!
//! Named services loaded from storager.json (override with `STORAGER_CONFIG`).
//! Creates default config file on first run / 首次运行时创建默认配置文件

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::storage::pairs::parse_connection_string;
use crate::storage::{Pairs, StorageManager, StoragerBox};

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Named services / 命名存储服务
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// One service, either as a connection string or as structured options
/// 单个服务配置：连接字符串或结构化参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceConfig {
    Connection {
        connection: String,
    },
    Structured {
        #[serde(rename = "type")]
        driver_type: String,
        #[serde(flatten)]
        options: BTreeMap<String, Value>,
    },
}

impl ServiceConfig {
    /// Driver type and option pairs / 解析为驱动类型与配置项
    pub fn to_pairs(&self) -> Result<(String, Pairs)> {
        match self {
            ServiceConfig::Connection { connection } => parse_connection_string(connection),
            ServiceConfig::Structured { driver_type, options } => {
                let pairs = options
                    .iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key.clone(), value)
                    })
                    .collect();
                Ok((driver_type.clone(), pairs))
            }
        }
    }
}

impl AppConfig {
    /// Construct every configured service into `manager` / 创建所有配置的服务
    ///
    /// Services that fail to construct are logged and skipped.
    pub fn build(&self, manager: &StorageManager) -> Vec<(String, StoragerBox)> {
        let mut built = Vec::new();
        for (id, service) in &self.services {
            let result = service
                .to_pairs()
                .and_then(|(driver_type, pairs)| manager.create_driver(id, &driver_type, &pairs));
            match result {
                Ok(store) => {
                    tracing::info!("Service {} ready ({})", id, store.name());
                    built.push((id.clone(), store));
                }
                Err(e) => tracing::warn!("Service {} skipped: {}", id, e),
            }
        }
        built
    }

    fn sample() -> Self {
        let local_dir = std::env::temp_dir().join("storager-demo");
        let mut services = BTreeMap::new();
        services.insert(
            "local".to_string(),
            ServiceConfig::Structured {
                driver_type: "fs".to_string(),
                options: BTreeMap::from([(
                    "work_dir".to_string(),
                    Value::String(local_dir.to_string_lossy().to_string()),
                )]),
            },
        );
        services.insert(
            "scratch".to_string(),
            ServiceConfig::Connection {
                connection: "memory:///demo?max_append_size=1048576".to_string(),
            },
        );
        Self { services }
    }
}

/// Get the config file path / 获取配置文件路径
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("STORAGER_CONFIG") {
        return PathBuf::from(path);
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("storager.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig> {
    let config_path = get_config_path();

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| StorageError::invalid_config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| StorageError::invalid_config(format!("Failed to parse config file: {}", e)))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::sample();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<()> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| StorageError::invalid_config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(&config_path, content).map_err(|e| StorageError::from_io(e, &config_path.to_string_lossy()))?;

    Ok(())
}
