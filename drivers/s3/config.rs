//! S3驱动配置

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::storage::{Credential, Endpoint};

/// Raw options as validated by the manager / 原始配置项
#[derive(Debug, Deserialize)]
struct RawOptions {
    name: String,
    credential: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default = "default_region")]
    location: String,
}

/// S3配置
#[derive(Debug, Clone)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// 区域
    pub region: String,
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    /// Build from typed driver options / 从驱动配置构造
    pub fn from_options(service: &str, config: &Value, force_path_style: bool) -> Result<Self> {
        let raw: RawOptions = serde_json::from_value(config.clone())
            .map_err(|e| StorageError::invalid_config(format!("{}: {}", service, e)))?;

        let (access_key_id, secret_access_key) = match raw.credential.parse::<Credential>()? {
            Credential::Hmac {
                access_key_id,
                secret_access_key,
            } => (access_key_id, secret_access_key),
            other => {
                return Err(StorageError::invalid_config(format!(
                    "{}: credential protocol {} is not supported, use hmac:<ak>:<sk>",
                    service,
                    other.protocol()
                )))
            }
        };

        let endpoint = match raw.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(ep) => ep.parse::<Endpoint>()?.to_url(),
            None if force_path_style => {
                return Err(StorageError::invalid_config(format!("{}: endpoint is required", service)));
            }
            None => format!("https://s3.{}.amazonaws.com", raw.location),
        };

        Ok(Self {
            bucket: raw.name,
            region: raw.location,
            endpoint,
            access_key_id,
            secret_access_key,
            force_path_style,
        })
    }
}
