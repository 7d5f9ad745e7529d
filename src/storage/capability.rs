//! Capability registry / 能力注册表
//!
//! Generic code must go through these functions to learn whether a handle offers
//! append, directory listing, glob, stat or whole-object read. A capability that is
//! not declared yields [`StorageError::CapabilityUnsupported`] before any backend
//! call is made.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Appender, DirLister, Globber, Storager};
use crate::error::{Result, StorageError};

/// Optional operation groups / 可选能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    Append,
    Read,
    DirList,
    Glob,
    Stat,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityKind::Append => "append",
            CapabilityKind::Read => "read",
            CapabilityKind::DirList => "dir_list",
            CapabilityKind::Glob => "glob",
            CapabilityKind::Stat => "stat",
        };
        f.write_str(name)
    }
}

/// What `create_append` does when the object already exists / 已存在对象的创建策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateAppendPolicy {
    /// Existing content is discarded and the object restarts at offset 0
    Truncate,
    /// Creation fails with `AlreadyExists`
    CreateOnce,
    /// Backend has no append support
    NotApplicable,
}

/// Driver capability declaration / 驱动能力声明
///
/// Fixed when the driver is constructed and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Support append write / 支持追加写入
    pub can_append: bool,
    /// Support single-call whole-object read / 支持整体读取
    pub can_read: bool,
    /// Support one-level directory listing / 支持目录列举
    pub can_dir_list: bool,
    /// Support wildcard matching over keys / 支持通配符匹配
    pub can_glob: bool,
    /// Support path metadata lookup / 支持元数据查询
    pub can_stat: bool,
    /// Maximum cumulative appendable size (None means no limit) / 最大追加大小
    pub max_append_size: Option<u64>,
    pub create_append_policy: CreateAppendPolicy,
}

impl Default for Capability {
    fn default() -> Self {
        Self {
            can_append: false,
            can_read: false,
            can_dir_list: false,
            can_glob: false,
            can_stat: false,
            max_append_size: None,
            create_append_policy: CreateAppendPolicy::NotApplicable,
        }
    }
}

impl Capability {
    pub fn supports(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Append => self.can_append,
            CapabilityKind::Read => self.can_read,
            CapabilityKind::DirList => self.can_dir_list,
            CapabilityKind::Glob => self.can_glob,
            CapabilityKind::Stat => self.can_stat,
        }
    }

    pub fn supported(&self) -> Vec<CapabilityKind> {
        [
            CapabilityKind::Append,
            CapabilityKind::Read,
            CapabilityKind::DirList,
            CapabilityKind::Glob,
            CapabilityKind::Stat,
        ]
        .into_iter()
        .filter(|kind| self.supports(*kind))
        .collect()
    }
}

/// Whether `store` offers `kind` / 查询是否支持某能力
pub fn supports(store: &dyn Storager, kind: CapabilityKind) -> bool {
    if !store.capabilities().supports(kind) {
        return false;
    }
    match kind {
        CapabilityKind::Append => store.as_appender().is_some(),
        CapabilityKind::DirList => store.as_dir_lister().is_some(),
        CapabilityKind::Glob => store.as_globber().is_some(),
        CapabilityKind::Read | CapabilityKind::Stat => true,
    }
}

/// Fail with `CapabilityUnsupported` unless `store` offers `kind`
pub fn require(store: &dyn Storager, kind: CapabilityKind) -> Result<()> {
    if supports(store, kind) {
        Ok(())
    } else {
        Err(unsupported(store, kind))
    }
}

pub fn appender(store: &dyn Storager) -> Result<&dyn Appender> {
    require(store, CapabilityKind::Append)?;
    store
        .as_appender()
        .ok_or_else(|| unsupported(store, CapabilityKind::Append))
}

pub fn dir_lister(store: &dyn Storager) -> Result<&dyn DirLister> {
    require(store, CapabilityKind::DirList)?;
    store
        .as_dir_lister()
        .ok_or_else(|| unsupported(store, CapabilityKind::DirList))
}

pub fn globber(store: &dyn Storager) -> Result<&dyn Globber> {
    require(store, CapabilityKind::Glob)?;
    store
        .as_globber()
        .ok_or_else(|| unsupported(store, CapabilityKind::Glob))
}

/// Maximum cumulative append size of an append-capable handle
pub fn max_append_size(store: &dyn Storager) -> Result<Option<u64>> {
    require(store, CapabilityKind::Append)?;
    Ok(store.capabilities().max_append_size)
}

fn unsupported(store: &dyn Storager, kind: CapabilityKind) -> StorageError {
    StorageError::CapabilityUnsupported {
        service: store.name().to_string(),
        capability: kind,
    }
}
