//! Google Drive 存储驱动
//!
//! 支持 OAuth refresh_token 授权方式（`file:` 凭证文件或 `oauth:` 内联凭证）
//! 支持读取、目录列举、元数据查询；不支持追加写入与通配符匹配

mod driver;

pub use driver::{GoogleDriveCredentials, GoogleDriveDriver, GoogleDriveDriverFactory};
