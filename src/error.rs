//! Storage error taxonomy / 存储错误分类
//!
//! Every backend translates its native failures into [`StorageError`] so callers
//! can branch on [`ErrorKind`] without knowing which service they talk to.

use thiserror::Error;

use crate::storage::CapabilityKind;

/// Coarse error classification / 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidPath,
    InvalidConfig,
    CapabilityUnsupported,
    OffsetMismatch,
    PermissionDenied,
    QuotaExceeded,
    Transient,
    Unexpected,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {path}")]
    NotFound { path: String },

    #[error("object already exists: {path}")]
    AlreadyExists { path: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("capability {capability} is not supported by service {service}")]
    CapabilityUnsupported {
        service: String,
        capability: CapabilityKind,
    },

    /// The held append offset disagrees with the object's real length.
    #[error("append offset mismatch on {path}: held {held}, actual length {actual}")]
    OffsetMismatch { path: String, held: u64, actual: u64 },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("unexpected storage error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StorageError::InvalidPath { .. } => ErrorKind::InvalidPath,
            StorageError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            StorageError::CapabilityUnsupported { .. } => ErrorKind::CapabilityUnsupported,
            StorageError::OffsetMismatch { .. } => ErrorKind::OffsetMismatch,
            StorageError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            StorageError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            StorageError::Transient(_) => ErrorKind::Transient,
            StorageError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        StorageError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        StorageError::InvalidConfig(msg.into())
    }

    /// Classify an io error raised while touching `path` / 将IO错误归类
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind as Io;

        match err.kind() {
            Io::NotFound => StorageError::NotFound { path: path.to_string() },
            Io::AlreadyExists => StorageError::AlreadyExists { path: path.to_string() },
            Io::PermissionDenied => StorageError::PermissionDenied { path: path.to_string() },
            Io::InvalidInput => StorageError::invalid_path(path, err.to_string()),
            Io::TimedOut
            | Io::Interrupted
            | Io::WouldBlock
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::BrokenPipe => StorageError::Transient(format!("{}: {}", path, err)),
            _ => match err.raw_os_error() {
                // ENOSPC / EDQUOT
                Some(28) | Some(122) => StorageError::QuotaExceeded(format!("{}: {}", path, err)),
                _ => StorageError::Unexpected(format!("{}: {}", path, err)),
            },
        }
    }

    /// Classify a failed HTTP status returned by an object service / 根据HTTP状态码归类
    pub fn from_status(status: u16, path: &str, body: &str) -> Self {
        match status {
            404 => StorageError::NotFound { path: path.to_string() },
            409 | 412 => StorageError::AlreadyExists { path: path.to_string() },
            401 | 403 if body.contains("QuotaExceeded") || body.contains("storageQuotaExceeded") => {
                StorageError::QuotaExceeded(format!("{}: {}", path, body))
            }
            401 | 403 => StorageError::PermissionDenied { path: path.to_string() },
            400 if body.contains("InvalidBucketName") || body.contains("KeyTooLong") => {
                StorageError::invalid_path(path, body.to_string())
            }
            408 | 429 | 500..=599 => StorageError::Transient(format!("{} returned HTTP {}", path, status)),
            _ => StorageError::Unexpected(format!("{} returned HTTP {}: {}", path, status, body)),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return StorageError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) => StorageError::from_status(status.as_u16(), err.url().map(|u| u.path()).unwrap_or(""), ""),
            None => StorageError::Unexpected(err.to_string()),
        }
    }
}

impl From<s3::error::S3Error> for StorageError {
    fn from(err: s3::error::S3Error) -> Self {
        use s3::error::S3Error;

        match err {
            S3Error::HttpFailWithBody(status, body) => StorageError::from_status(status, "", &body),
            S3Error::Credentials(e) => StorageError::InvalidConfig(e.to_string()),
            other => StorageError::Transient(other.to_string()),
        }
    }
}
