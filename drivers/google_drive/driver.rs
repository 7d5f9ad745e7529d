//! Google Drive 驱动实现
//!
//! 支持 OAuth refresh_token 授权，令牌过期时自动刷新并重试一次。
//! 工作目录映射到 My Drive 下以 `name` 命名的根文件夹。

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tokio_util::io::StreamReader;

use crate::error::{Result, StorageError};
use crate::storage::{
    collect_dir, read_exact_size, ByteSource, Capability, ConfigItem, CreateAppendPolicy, Credential, DirLister,
    DriverConfig, DriverFactory, DriverOptions, ListMode, ObjectDescriptor, ObjectReader, ObjectStream, Storager,
    StoragerBox,
};
use crate::utils::{base_name, parent_dir, resolve, validate_object_path};

// ============ 常量 ============

const TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILES_LIST_FIELDS: &str = "files(id,name,mimeType,size,modifiedTime),nextPageToken";
const FILE_INFO_FIELDS: &str = "files(id,name,mimeType,size,modifiedTime)";

// ============ 配置结构 ============

/// OAuth client and refresh token / OAuth 凭证
#[derive(Clone, Deserialize)]
pub struct GoogleDriveCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for GoogleDriveCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GoogleDriveCredentials({}:***)", self.client_id)
    }
}

impl GoogleDriveCredentials {
    /// Load from a `file:` or `oauth:` credential / 从凭证加载
    pub fn from_credential(credential: &Credential) -> Result<Self> {
        match credential {
            Credential::OAuth {
                client_id,
                client_secret,
                refresh_token,
            } => Ok(Self {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                refresh_token: refresh_token.clone(),
            }),
            Credential::File(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    StorageError::invalid_config(format!("gdrive: read credential file {}: {}", path.display(), e))
                })?;
                let creds: Self = serde_json::from_str(&content).map_err(|e| {
                    StorageError::invalid_config(format!("gdrive: parse credential file {}: {}", path.display(), e))
                })?;
                if creds.client_id.is_empty() || creds.client_secret.is_empty() || creds.refresh_token.is_empty() {
                    return Err(StorageError::invalid_config(format!(
                        "gdrive: credential file {} has empty fields",
                        path.display()
                    )));
                }
                Ok(creds)
            }
            other => Err(StorageError::invalid_config(format!(
                "gdrive: credential protocol {} is not supported, use file: or oauth:",
                other.protocol()
            ))),
        }
    }
}

// ============ API响应结构 ============

/// Token刷新响应
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token错误
#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    error_description: Option<String>,
}

/// 文件列表响应
#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    files: Vec<GoogleFile>,
}

/// Google Drive文件
#[derive(Debug, Deserialize)]
struct GoogleFile {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "modifiedTime")]
    modified_time: Option<String>,
    size: Option<String>,
}

impl GoogleFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    fn describe(self, path: String) -> ObjectDescriptor {
        if self.is_folder() {
            return ObjectDescriptor::dir(path);
        }
        let size = self.size.and_then(|s| s.parse().ok()).unwrap_or(0);
        ObjectDescriptor::file(path, size).with_modified(self.modified_time)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Request body / 请求体
enum Payload {
    Empty,
    Json(Value),
    Media(Bytes),
}

/// Escape a literal for the Drive `q` query language / 转义查询字符串
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Canonical directory key used by the path cache / 目录缓存键
fn dir_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn ensure_success(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::from_status(status.as_u16(), path, &body))
}

// ============ API客户端 ============

/// Shared Drive API state, cloned into lazy listings / API 状态
struct DriveApi {
    client: Client,
    credentials: GoogleDriveCredentials,
    root_name: String,
    root_id: OnceCell<String>,
    access_token: RwLock<Option<String>>,
    /// 目录ID缓存 (path -> id)
    path_cache: RwLock<HashMap<String, String>>,
}

impl DriveApi {
    /// 获取访问令牌
    async fn get_access_token(&self) -> Result<String> {
        {
            let token = self.access_token.read().await;
            if let Some(ref t) = *token {
                return Ok(t.clone());
            }
        }
        self.do_refresh_token().await
    }

    /// 刷新访问令牌
    async fn do_refresh_token(&self) -> Result<String> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self.client.post(TOKEN_URL).form(&params).send().await?;
        let status = response.status();

        if status.is_success() {
            let token_resp: TokenResponse = response.json().await?;
            *self.access_token.write().await = Some(token_resp.access_token.clone());
            tracing::debug!("Google Drive access token refreshed");
            return Ok(token_resp.access_token);
        }

        let error: TokenError = response.json().await.unwrap_or_else(|_| TokenError {
            error: "unknown".to_string(),
            error_description: None,
        });
        let reason = error.error_description.unwrap_or(error.error);
        tracing::warn!("Google Drive token refresh failed: HTTP {} {}", status, reason);

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(StorageError::PermissionDenied {
                path: format!("oauth token refresh: {}", reason),
            }),
            _ => Err(StorageError::from_status(status.as_u16(), TOKEN_URL, &reason)),
        }
    }

    fn build(&self, method: Method, url: &str, query: &[(&str, &str)], payload: &Payload, token: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .query(&[("supportsAllDrives", "true")])
            .query(query);

        match payload {
            Payload::Empty => request,
            Payload::Json(body) => request.json(body),
            Payload::Media(data) => request
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data.clone()),
        }
    }

    /// 发起API请求，401 时刷新令牌后重试一次
    async fn request(&self, method: Method, url: &str, query: &[(&str, &str)], payload: Payload) -> Result<Response> {
        let token = self.get_access_token().await?;
        let response = self.build(method.clone(), url, query, &payload, &token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Token过期，刷新后重试
            *self.access_token.write().await = None;
            let new_token = self.do_refresh_token().await?;
            return Ok(self.build(method, url, query, &payload, &new_token).send().await?);
        }

        Ok(response)
    }

    /// Find or create the root folder / 获取根文件夹ID
    async fn root_id(&self) -> Result<String> {
        let id = self
            .root_id
            .get_or_try_init(|| async {
                if let Some(folder) = self.find_child("root", &self.root_name).await? {
                    if !folder.is_folder() {
                        return Err(StorageError::invalid_config(format!(
                            "gdrive: {} exists and is not a folder",
                            self.root_name
                        )));
                    }
                    return Ok(folder.id);
                }
                tracing::info!("Google Drive root folder {} not found, creating it", self.root_name);
                self.create_folder("root", &self.root_name).await
            })
            .await?;
        Ok(id.clone())
    }

    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<GoogleFile>> {
        let q = format!(
            "name='{}' and '{}' in parents and trashed=false",
            escape_query(name),
            escape_query(parent_id)
        );
        let response = self
            .request(
                Method::GET,
                FILES_URL,
                &[("q", q.as_str()), ("fields", FILE_INFO_FIELDS), ("pageSize", "1")],
                Payload::Empty,
            )
            .await?;
        let files: FilesResponse = ensure_success(response, name).await?.json().await?;
        Ok(files.files.into_iter().next())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let body = serde_json::json!({
            "name": name,
            "parents": [parent_id],
            "mimeType": FOLDER_MIME,
        });
        let response = self.request(Method::POST, FILES_URL, &[], Payload::Json(body)).await?;
        let created: CreatedFile = ensure_success(response, name).await?.json().await?;
        Ok(created.id)
    }

    async fn list_children(&self, parent_id: &str, page_token: Option<&str>) -> Result<FilesResponse> {
        let q = format!("'{}' in parents and trashed=false", escape_query(parent_id));
        let mut query = vec![
            ("q", q.as_str()),
            ("fields", FILES_LIST_FIELDS),
            ("orderBy", "folder,name"),
            ("pageSize", "1000"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response = self.request(Method::GET, FILES_URL, &query, Payload::Empty).await?;
        Ok(ensure_success(response, parent_id).await?.json().await?)
    }

    /// Resolve a directory path to its folder id / 解析目录ID
    ///
    /// With `create`, missing folders along the way are created. Without it a
    /// missing component yields `None`.
    async fn get_dir_id(&self, path: &str, create: bool) -> Result<Option<String>> {
        let normalized = dir_key(path);

        // 检查缓存
        if let Some(id) = self.path_cache.read().await.get(&normalized) {
            return Ok(Some(id.clone()));
        }

        let mut current_id = self.root_id().await?;
        let mut current_path = String::new();

        for part in normalized.split('/').filter(|s| !s.is_empty()) {
            current_path = format!("{}/{}", current_path, part);

            if let Some(id) = self.path_cache.read().await.get(&current_path) {
                current_id = id.clone();
                continue;
            }

            current_id = match self.find_child(&current_id, part).await? {
                Some(file) if file.is_folder() => file.id,
                Some(_) if create => {
                    return Err(StorageError::invalid_path(&current_path, "a file exists where a folder is needed"));
                }
                None if create => self.create_folder(&current_id, part).await?,
                _ => return Ok(None),
            };

            self.path_cache.write().await.insert(current_path.clone(), current_id.clone());
        }

        Ok(Some(current_id))
    }

    /// Metadata of the object at `path`, if any / 查找对象
    async fn lookup(&self, path: &str) -> Result<Option<GoogleFile>> {
        let parent = match self.get_dir_id(&parent_dir(path), false).await? {
            Some(id) => id,
            None => return Ok(None),
        };
        self.find_child(&parent, base_name(path)).await
    }

    async fn forget(&self, path: &str) {
        let key = dir_key(path);
        let nested = format!("{}/", key);
        self.path_cache
            .write()
            .await
            .retain(|cached, _| cached != &key && !cached.starts_with(&nested));
    }
}

// ============ 驱动主体 ============

/// Google Drive 驱动
pub struct GoogleDriveDriver {
    work_dir: String,
    list_mode: ListMode,
    capability: Capability,
    api: Arc<DriveApi>,
}

impl GoogleDriveDriver {
    /// 创建新的驱动实例
    pub fn new(work_dir: String, list_mode: ListMode, root_name: String, credentials: GoogleDriveCredentials) -> Self {
        Self {
            work_dir,
            list_mode,
            capability: Capability {
                can_append: false,
                can_read: true,
                can_dir_list: true,
                can_glob: false,
                can_stat: true,
                max_append_size: None,
                create_append_policy: CreateAppendPolicy::NotApplicable,
            },
            api: Arc::new(DriveApi {
                client: Client::new(),
                credentials,
                root_name,
                root_id: OnceCell::new(),
                access_token: RwLock::new(None),
                path_cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn object_path(&self, path: &str) -> Result<String> {
        let abs = resolve(&self.work_dir, path);
        validate_object_path(&abs)?;
        Ok(abs)
    }

    /// Upload into a fresh file through a resumable session / 新建文件上传
    async fn upload_new(&self, parent_id: &str, name: &str, data: Bytes) -> Result<()> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });
        let response = self
            .api
            .request(Method::POST, UPLOAD_URL, &[("uploadType", "resumable")], Payload::Json(metadata))
            .await?;
        let response = ensure_success(response, name).await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| StorageError::Unexpected("upload session returned no location".to_string()))?
            .to_string();

        let len = data.len();
        let response = self
            .api
            .client
            .put(&location)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(data)
            .send()
            .await?;
        ensure_success(response, name).await?;
        Ok(())
    }

    /// Replace the content of an existing file / 覆盖已有文件
    async fn upload_existing(&self, file_id: &str, name: &str, data: Bytes) -> Result<()> {
        let url = format!("{}/{}", UPLOAD_URL, file_id);
        let response = self
            .api
            .request(Method::PATCH, &url, &[("uploadType", "media")], Payload::Media(data))
            .await?;
        ensure_success(response, name).await?;
        Ok(())
    }
}

/// Paged walk over one or more folders / 分页遍历状态
struct ListState {
    api: Arc<DriveApi>,
    recursive: bool,
    pending: Vec<(String, String)>,
    current: Option<(String, String, String)>,
}

#[async_trait]
impl Storager for GoogleDriveDriver {
    fn name(&self) -> &str {
        "gdrive"
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
        let path = object.path();
        validate_object_path(path)?;
        let data = Bytes::from(read_exact_size(reader, size).await?);

        let parent_id = self
            .api
            .get_dir_id(&parent_dir(path), true)
            .await?
            .ok_or_else(|| StorageError::NotFound { path: parent_dir(path) })?;
        let name = base_name(path);

        match self.api.find_child(&parent_id, name).await? {
            Some(file) if file.is_folder() => {
                return Err(StorageError::invalid_path(path, "a folder exists at this path"));
            }
            Some(file) => self.upload_existing(&file.id, name, data).await?,
            None => self.upload_new(&parent_id, name, data).await?,
        }

        tracing::debug!("Google Drive upload {} ({} bytes)", path, size);
        Ok(size)
    }

    async fn read(&self, path: &str) -> Result<ObjectReader> {
        let abs = self.object_path(path)?;
        let file = self
            .api
            .lookup(&abs)
            .await?
            .ok_or_else(|| StorageError::NotFound { path: abs.clone() })?;
        if file.is_folder() {
            return Err(StorageError::invalid_path(&abs, "is a folder"));
        }

        let url = format!("{}/{}", FILES_URL, file.id);
        let response = self
            .api
            .request(Method::GET, &url, &[("alt", "media"), ("acknowledgeAbuse", "true")], Payload::Empty)
            .await?;
        let response = ensure_success(response, &abs).await?;

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn stat(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = resolve(&self.work_dir, path);
        let key = dir_key(&abs);
        if key == "/" {
            self.api.root_id().await?;
            return Ok(ObjectDescriptor::dir("/"));
        }

        match self.api.lookup(&key).await? {
            Some(file) => Ok(file.describe(key)),
            None => Err(StorageError::NotFound { path: abs }),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.object_path(path)?;
        let file = match self.api.lookup(&abs).await? {
            Some(file) => file,
            None => return Ok(()),
        };

        let url = format!("{}/{}", FILES_URL, file.id);
        let response = self.api.request(Method::DELETE, &url, &[], Payload::Empty).await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response, &abs).await?;
        }

        // 清除缓存
        self.api.forget(&abs).await;
        tracing::debug!("Google Drive delete {}", abs);
        Ok(())
    }

    async fn list_with(&self, prefix: &str, mode: ListMode) -> Result<ObjectStream> {
        let dir = dir_key(&resolve(&self.work_dir, prefix));
        let dir_id = match self.api.get_dir_id(&dir, false).await? {
            Some(id) => id,
            None if mode == ListMode::Prefix => {
                return Ok(stream::empty::<Result<ObjectDescriptor>>().boxed());
            }
            None => return Err(StorageError::NotFound { path: dir }),
        };

        let state = ListState {
            api: self.api.clone(),
            recursive: mode == ListMode::Prefix,
            pending: vec![(dir, dir_id)],
            current: None,
        };

        let pages = stream::try_unfold(state, |mut state| async move {
            let (dir_path, dir_id, token) = match state.current.take() {
                Some((path, id, token)) => (path, id, Some(token)),
                None => match state.pending.pop() {
                    Some((path, id)) => (path, id, None),
                    None => return Ok::<_, StorageError>(None),
                },
            };

            let page = state.api.list_children(&dir_id, token.as_deref()).await?;
            if let Some(next) = page.next_page_token {
                state.current = Some((dir_path.clone(), dir_id, next));
            }

            let mut entries = Vec::with_capacity(page.files.len());
            for file in page.files {
                let path = join_path(&dir_path, &file.name);
                if file.is_folder() {
                    state.api.path_cache.write().await.insert(path.clone(), file.id.clone());
                    if state.recursive {
                        state.pending.push((path, file.id));
                        continue;
                    }
                }
                entries.push(file.describe(path));
            }
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
}

#[async_trait]
impl DirLister for GoogleDriveDriver {
    async fn list_dir(&self, path: &str) -> Result<Vec<ObjectDescriptor>> {
        collect_dir(self, path).await
    }
}

// ============ 驱动工厂 ============

pub struct GoogleDriveDriverFactory;

impl DriverFactory for GoogleDriveDriverFactory {
    fn driver_type(&self) -> &'static str {
        "gdrive"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            default_list_mode: ListMode::Dir,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("name", "string")
                .help("Root folder name in My Drive, created when missing")
                .required(),
            ConfigItem::new("credential", "password")
                .help("file:<path to json with client_id, client_secret, refresh_token> or oauth:<id>:<secret>:<refresh_token>")
                .required(),
        ]
    }

    fn create_driver(&self, options: DriverOptions) -> Result<StoragerBox> {
        let root_name = options.config.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let credential: Credential = options
            .config
            .get("credential")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .parse()?;
        let credentials = GoogleDriveCredentials::from_credential(&credential)?;

        let mut components = Path::new(&root_name).components();
        let single_folder = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_folder {
            return Err(StorageError::invalid_config(format!("gdrive: invalid root folder name {:?}", root_name)));
        }

        tracing::info!("Google Drive driver initialized, root folder: {}", root_name);
        Ok(Arc::new(GoogleDriveDriver::new(
            options.work_dir,
            options.list_mode,
            root_name,
            credentials,
        )))
    }
}
