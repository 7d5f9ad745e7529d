//! S3驱动核心实现
//!
//! 对象键 = 规范路径去掉开头的 `/`；目录由公共前缀推断。
//! 列举按页懒加载，每页一次 ListObjectsV2 请求。

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::serde_types::ListBucketResult;
use s3::Region;

use super::config::S3Config;
use crate::error::{Result, StorageError};
use crate::storage::{
    collect_dir, glob_by_listing, read_exact_size, ByteSource, Capability, CreateAppendPolicy, DirLister, Globber,
    ListMode, ObjectDescriptor, ObjectReader, ObjectStream, Storager,
};
use crate::utils::{resolve, validate_object_path};

const PAGE_SIZE: usize = 1000;

/// S3驱动
pub struct S3Driver {
    service: &'static str,
    work_dir: String,
    list_mode: ListMode,
    capability: Capability,
    bucket: Box<Bucket>,
}

impl S3Driver {
    /// 创建新的S3驱动实例
    pub fn new(service: &'static str, work_dir: String, list_mode: ListMode, config: S3Config) -> Result<Self> {
        let bucket = Self::create_bucket(&config)?;
        Ok(Self {
            service,
            work_dir,
            list_mode,
            capability: Capability {
                can_append: false,
                can_read: true,
                can_dir_list: true,
                can_glob: true,
                can_stat: true,
                max_append_size: None,
                create_append_policy: CreateAppendPolicy::NotApplicable,
            },
            bucket,
        })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::invalid_config(format!("create S3 credentials: {}", e)))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::invalid_config(format!("create S3 bucket {}: {}", config.bucket, e)))?;

        Ok(if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    fn object_path(&self, path: &str) -> Result<String> {
        let abs = resolve(&self.work_dir, path);
        validate_object_path(&abs)?;
        Ok(abs)
    }
}

/// 获取完整的对象键
pub(crate) fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Listing prefix for a canonical directory path, always ending with `/` unless empty
pub(crate) fn list_prefix(dir: &str) -> String {
    let key = object_key(dir);
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

/// Turn one ListObjectsV2 page into descriptors / 解析单页结果
fn page_entries(page: ListBucketResult, prefix: &str) -> Vec<ObjectDescriptor> {
    let mut entries = Vec::new();

    for cp in page.common_prefixes.unwrap_or_default() {
        let dir = cp.prefix.trim_end_matches('/');
        if !dir.is_empty() {
            entries.push(ObjectDescriptor::dir(format!("/{}", dir)));
        }
    }

    for obj in page.contents {
        // 跳过目录标记对象
        if obj.key == prefix || obj.key.ends_with('/') {
            continue;
        }
        entries.push(
            ObjectDescriptor::file(format!("/{}", obj.key), obj.size as u64).with_modified(Some(obj.last_modified)),
        );
    }

    entries
}

struct PageState {
    bucket: Box<Bucket>,
    prefix: String,
    delimiter: Option<String>,
    token: Option<String>,
    done: bool,
}

#[async_trait]
impl Storager for S3Driver {
    fn name(&self) -> &str {
        self.service
    }

    fn work_dir(&self) -> &str {
        &self.work_dir
    }

    fn capabilities(&self) -> &Capability {
        &self.capability
    }

    fn list_mode(&self) -> ListMode {
        self.list_mode
    }

    async fn create(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = self.object_path(path)?;
        Ok(ObjectDescriptor::file(abs, 0))
    }

    async fn write(&self, object: &ObjectDescriptor, reader: ByteSource<'_>, size: u64) -> Result<u64> {
        validate_object_path(object.path())?;
        let key = object_key(object.path());
        let data = read_exact_size(reader, size).await?;

        let resp = self.bucket.put_object(key, &data).await?;
        let status = resp.status_code();
        if !(200..300).contains(&status) {
            let body = String::from_utf8_lossy(resp.bytes()).to_string();
            return Err(StorageError::from_status(status, object.path(), &body));
        }

        tracing::debug!("S3 PutObject {}/{} ({} bytes)", self.bucket.name(), key, size);
        Ok(size)
    }

    async fn read(&self, path: &str) -> Result<ObjectReader> {
        let abs = self.object_path(path)?;
        let resp = self.bucket.get_object(object_key(&abs)).await.map_err(|e| match StorageError::from(e) {
            StorageError::NotFound { .. } => StorageError::NotFound { path: abs.clone() },
            other => other,
        })?;

        let status = resp.status_code();
        if !(200..300).contains(&status) {
            let body = String::from_utf8_lossy(resp.bytes()).to_string();
            return Err(StorageError::from_status(status, &abs, &body));
        }

        // rust-s3返回完整响应，封装为AsyncRead
        let data = resp.bytes().to_vec();
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn stat(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = resolve(&self.work_dir, path);
        let key = object_key(abs.trim_end_matches('/'));

        if !key.is_empty() {
            let head = match self.bucket.head_object(key).await {
                Ok((head, status)) if (200..300).contains(&status) => Some(head),
                Ok((_, 404)) => None,
                Ok((_, status)) => return Err(StorageError::from_status(status, &abs, "")),
                Err(e) => match StorageError::from(e) {
                    StorageError::NotFound { .. } => None,
                    other => return Err(other),
                },
            };
            if let Some(head) = head {
                let size = head.content_length.unwrap_or(0).max(0) as u64;
                return Ok(ObjectDescriptor::file(format!("/{}", key), size).with_modified(head.last_modified));
            }
        }

        // 没有同名对象时检查是否为目录前缀
        let prefix = list_prefix(&abs);
        let (page, status) = self
            .bucket
            .list_page(prefix, Some("/".to_string()), None, None, Some(1))
            .await?;
        if !(200..300).contains(&status) {
            return Err(StorageError::from_status(status, &abs, ""));
        }
        let has_children = !page.contents.is_empty() || page.common_prefixes.map(|c| !c.is_empty()).unwrap_or(false);
        if has_children {
            return Ok(ObjectDescriptor::dir(abs.trim_end_matches('/')));
        }

        Err(StorageError::NotFound { path: abs })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.object_path(path)?;
        let resp = self.bucket.delete_object(object_key(&abs)).await?;

        match resp.status_code() {
            200..=299 | 404 => Ok(()),
            status => {
                let body = String::from_utf8_lossy(resp.bytes()).to_string();
                Err(StorageError::from_status(status, &abs, &body))
            }
        }
    }

    async fn list_with(&self, prefix: &str, mode: ListMode) -> Result<ObjectStream> {
        let dir = resolve(&self.work_dir, prefix);
        let state = PageState {
            bucket: self.bucket.clone(),
            prefix: list_prefix(&dir),
            delimiter: match mode {
                ListMode::Dir => Some("/".to_string()),
                ListMode::Prefix => None,
            },
            token: None,
            done: false,
        };

        let pages = stream::try_unfold(state, |mut state| async move {
            if state.done {
                return Ok::<_, StorageError>(None);
            }
            let (page, status) = state
                .bucket
                .list_page(
                    state.prefix.clone(),
                    state.delimiter.clone(),
                    state.token.take(),
                    None,
                    Some(PAGE_SIZE),
                )
                .await?;
            if !(200..300).contains(&status) {
                return Err(StorageError::from_status(status, &format!("/{}", state.prefix), ""));
            }

            tracing::debug!("S3 ListObjectsV2 {} -> {} keys", state.prefix, page.contents.len());
            state.token = page.next_continuation_token.clone();
            state.done = state.token.is_none();
            let entries = page_entries(page, &state.prefix);
            Ok(Some((entries, state)))
        });

        Ok(pages
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
            .try_flatten()
            .boxed())
    }

    fn as_dir_lister(&self) -> Option<&dyn DirLister> {
        Some(self)
    }

    fn as_globber(&self) -> Option<&dyn Globber> {
        Some(self)
    }
}

#[async_trait]
impl DirLister for S3Driver {
    async fn list_dir(&self, path: &str) -> Result<Vec<ObjectDescriptor>> {
        collect_dir(self, path).await
    }
}

#[async_trait]
impl Globber for S3Driver {
    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        glob_by_listing(self, pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::capability;
    use crate::storage::CapabilityKind;
    use serde_json::json;

    fn driver(service: &'static str, path_style: bool) -> S3Driver {
        let options = json!({
            "name": "logs",
            "credential": "hmac:ak:sk",
            "endpoint": "http:127.0.0.1:9000",
        });
        let config = S3Config::from_options(service, &options, path_style).unwrap();
        S3Driver::new(service, "/work/".to_string(), ListMode::Dir, config).unwrap()
    }

    #[test]
    fn test_object_keys() {
        assert_eq!(object_key("/work/a.txt"), "work/a.txt");
        assert_eq!(list_prefix("/work/"), "work/");
        assert_eq!(list_prefix("/work/docs"), "work/docs/");
        assert_eq!(list_prefix("/"), "");
    }

    #[test]
    fn test_capabilities() {
        let store = driver("minio", true);
        assert_eq!(store.name(), "minio");
        assert!(!capability::supports(&store, CapabilityKind::Append));
        assert!(capability::supports(&store, CapabilityKind::Glob));
        assert!(capability::supports(&store, CapabilityKind::DirList));
        assert_eq!(
            capability::appender(&store).err().map(|e| e.kind()),
            Some(crate::error::ErrorKind::CapabilityUnsupported)
        );
    }

    #[tokio::test]
    async fn test_invalid_path_needs_no_network() {
        let store = driver("s3", false);
        let err = store.create("dir/").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPath);
        let err = store.delete("../escape").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPath);
    }
}
