use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, StorageError};

pub mod capability;
pub mod local_factory;
pub mod manager;
pub mod object;
pub mod pairs;

pub use capability::{Capability, CapabilityKind, CreateAppendPolicy};
pub use local_factory::LocalDriverFactory;
pub use manager::{DriverFactory, DriverOptions, StorageManager, StoragerBox};
pub use object::{ObjectDescriptor, ObjectMode};
pub use pairs::{Credential, Endpoint, Pairs};

/// Lazy byte stream returned by `read` / 对象读取流
///
/// Single pass; dropping it releases the backend read session.
pub type ObjectReader = Box<dyn AsyncRead + Unpin + Send>;

/// Byte source consumed by `write` and `write_append` / 写入数据源
pub type ByteSource<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Lazy, finite listing / 对象列举流
pub type ObjectStream = BoxStream<'static, Result<ObjectDescriptor>>;

/// Upper bound for buffers preallocated from a caller-declared size
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// Configuration item definition / 配置项定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ConfigItem {
    pub fn new(name: &str, item_type: &str) -> Self {
        Self {
            name: name.to_string(),
            item_type: item_type.to_string(),
            default: None,
            options: None,
            required: false,
            help: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, val: &str) -> Self {
        self.default = Some(val.to_string());
        self
    }

    pub fn help(mut self, val: &str) -> Self {
        self.help = Some(val.to_string());
        self
    }

    pub fn options(mut self, val: &str) -> Self {
        self.options = Some(val.to_string());
        self
    }
}

/// Driver configuration information / 驱动配置信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// List mode used when `list_mode` is not given / 默认列举方式
    #[serde(default)]
    pub default_list_mode: ListMode,
}

/// Complete driver information / 驱动完整信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Options shared by all drivers (work_dir, list_mode) / 通用配置项
    pub common: Vec<ConfigItem>,
    /// Driver-specific configuration items / 驱动特有配置项
    pub additional: Vec<ConfigItem>,
    pub config: DriverConfig,
}

/// Generate common configuration items shared by all drivers / 生成通用配置项
pub fn get_common_items(config: &DriverConfig) -> Vec<ConfigItem> {
    vec![
        ConfigItem::new("work_dir", "string")
            .default("/")
            .help("Relative paths are resolved against this directory"),
        ConfigItem::new("list_mode", "select")
            .options("dir,prefix")
            .default(config.default_list_mode.as_str())
            .help("dir lists immediate children, prefix lists every object under the prefix"),
    ]
}

/// How `list` walks the namespace / 列举方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    /// Immediate children only / 仅列出直接子项
    #[default]
    Dir,
    /// Every object under the prefix / 递归列出前缀下所有对象
    Prefix,
}

impl ListMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListMode::Dir => "dir",
            ListMode::Prefix => "prefix",
        }
    }
}

impl std::str::FromStr for ListMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dir" => Ok(ListMode::Dir),
            "prefix" => Ok(ListMode::Prefix),
            other => Err(StorageError::invalid_config(format!("unknown list_mode: {}", other))),
        }
    }
}

/// Core storage interface every backend implements / 存储核心接口
///
/// All path arguments are resolved against [`Storager::work_dir`] first.
#[async_trait]
pub trait Storager: Send + Sync {
    /// Service type name / 服务类型
    fn name(&self) -> &str;

    /// Normalized working directory / 工作目录
    fn work_dir(&self) -> &str;

    /// Capabilities declared at construction / 驱动能力
    fn capabilities(&self) -> &Capability;

    /// Listing mode configured for this handle / 列举方式
    fn list_mode(&self) -> ListMode;

    /// Declare intent to write; validates the path / 准备写入
    async fn create(&self, path: &str) -> Result<ObjectDescriptor>;

    /// Replace the object content with exactly `size` bytes from `reader`
    /// 写入完整对象
    async fn write(&self, object: &ObjectDescriptor, reader: ByteSource<'_>, size: u64) -> Result<u64>;

    /// Open a lazy single-pass reader / 打开读取流
    async fn read(&self, path: &str) -> Result<ObjectReader>;

    /// Fetch current metadata / 获取元数据
    async fn stat(&self, path: &str) -> Result<ObjectDescriptor>;

    /// Delete an object; deleting a missing object succeeds / 删除对象
    async fn delete(&self, path: &str) -> Result<()>;

    /// List with an explicit mode / 按指定方式列举
    async fn list_with(&self, prefix: &str, mode: ListMode) -> Result<ObjectStream>;

    /// List with the handle's configured mode / 列举
    async fn list(&self, prefix: &str) -> Result<ObjectStream> {
        self.list_with(prefix, self.list_mode()).await
    }

    fn as_appender(&self) -> Option<&dyn Appender> {
        None
    }

    fn as_dir_lister(&self) -> Option<&dyn DirLister> {
        None
    }

    fn as_globber(&self) -> Option<&dyn Globber> {
        None
    }
}

/// Server-tracked append protocol / 追加写入协议
#[async_trait]
pub trait Appender: Send + Sync {
    /// Create an empty appendable object at offset 0 / 创建可追加对象
    ///
    /// Behavior for an existing object is given by
    /// [`Capability::create_append_policy`].
    async fn create_append(&self, path: &str) -> Result<ObjectDescriptor>;

    /// Append `size` bytes at `object.append_offset()` / 追加写入
    ///
    /// Fails with `OffsetMismatch` and leaves the object untouched when the held
    /// offset differs from the real length. On success `object` is advanced and the
    /// next append offset is returned.
    async fn write_append(&self, object: &mut ObjectDescriptor, reader: ByteSource<'_>, size: u64) -> Result<u64>;
}

/// One-level directory listing / 目录列举
#[async_trait]
pub trait DirLister: Send + Sync {
    async fn list_dir(&self, path: &str) -> Result<Vec<ObjectDescriptor>>;
}

/// Wildcard matching over the key namespace / 通配符匹配
#[async_trait]
pub trait Globber: Send + Sync {
    /// Names relative to the working directory, sorted / 返回相对工作目录的路径
    async fn glob(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Read exactly `size` bytes or fail without returning partial data
/// 精确读取 size 字节
pub async fn read_exact_size(reader: ByteSource<'_>, size: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
    let mut limited = (&mut *reader).take(size);
    limited
        .read_to_end(&mut buf)
        .await
        .map_err(|e| StorageError::Unexpected(format!("read source: {}", e)))?;

    if buf.len() as u64 != size {
        return Err(StorageError::Unexpected(format!(
            "source ended after {} of {} bytes",
            buf.len(),
            size
        )));
    }
    Ok(buf)
}

/// Collect one directory level through `list_with` / 收集单层目录
pub async fn collect_dir<S: Storager + ?Sized>(store: &S, path: &str) -> Result<Vec<ObjectDescriptor>> {
    let prefix = if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    };
    let stream = store.list_with(&prefix, ListMode::Dir).await?;
    stream.try_collect().await
}

/// Match `pattern` against every key under the working directory / 基于列举的通配符匹配
pub async fn glob_by_listing<S: Storager + ?Sized>(store: &S, pattern: &str) -> Result<Vec<String>> {
    let matcher = glob::Pattern::new(pattern)
        .map_err(|e| StorageError::invalid_path(pattern, e.to_string()))?;
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let work_dir = store.work_dir().to_string();
    let mut stream = store.list_with("", ListMode::Prefix).await?;
    let mut names = Vec::new();

    while let Some(object) = stream.try_next().await? {
        if object.mode().is_dir() {
            continue;
        }
        let rel = crate::utils::relative_to(&work_dir, object.path());
        if matcher.matches_with(&rel, options) {
            names.push(rel);
        }
    }

    names.sort();
    tracing::debug!("glob {} matched {} objects", pattern, names.len());
    Ok(names)
}
