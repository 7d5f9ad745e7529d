//! Object descriptor / 对象描述

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::utils::base_name;

/// Object mode bit-set / 对象模式位
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectMode(u8);

impl ObjectMode {
    pub const READ: ObjectMode = ObjectMode(1);
    pub const WRITE: ObjectMode = ObjectMode(1 << 1);
    pub const APPEND: ObjectMode = ObjectMode(1 << 2);
    pub const DIR: ObjectMode = ObjectMode(1 << 3);
    pub const LINK: ObjectMode = ObjectMode(1 << 4);

    pub const fn empty() -> Self {
        ObjectMode(0)
    }

    pub const fn contains(self, other: ObjectMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ObjectMode) {
        self.0 |= other.0;
    }

    pub fn is_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn is_append(self) -> bool {
        self.contains(Self::APPEND)
    }

    pub fn is_dir(self) -> bool {
        self.contains(Self::DIR)
    }

    pub fn is_link(self) -> bool {
        self.contains(Self::LINK)
    }
}

impl BitOr for ObjectMode {
    type Output = ObjectMode;

    fn bitor(self, rhs: ObjectMode) -> ObjectMode {
        ObjectMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObjectMode {
    fn bitor_assign(&mut self, rhs: ObjectMode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ObjectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READ, "READ"),
            (Self::WRITE, "WRITE"),
            (Self::APPEND, "APPEND"),
            (Self::DIR, "DIR"),
            (Self::LINK, "LINK"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();

        if set.is_empty() {
            write!(f, "EMPTY")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Metadata snapshot of a stored object / 对象元数据快照
///
/// Descriptors are plain values owned by the caller. A backend only mutates one
/// through [`crate::storage::Appender::write_append`], which advances both the
/// length and the append offset by the bytes written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    path: String,
    name: String,
    mode: ObjectMode,
    length: u64,
    append_offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<String>,
}

impl ObjectDescriptor {
    /// Regular object, readable and writable / 普通对象
    pub fn file(path: impl Into<String>, length: u64) -> Self {
        Self::with_mode(path, ObjectMode::READ | ObjectMode::WRITE, length)
    }

    /// Appendable object whose next append lands at `length` / 可追加对象
    pub fn appendable(path: impl Into<String>, length: u64) -> Self {
        let mut desc = Self::with_mode(path, ObjectMode::READ | ObjectMode::WRITE | ObjectMode::APPEND, length);
        desc.append_offset = length;
        desc
    }

    /// Directory entry / 目录
    pub fn dir(path: impl Into<String>) -> Self {
        Self::with_mode(path, ObjectMode::DIR, 0)
    }

    fn with_mode(path: impl Into<String>, mode: ObjectMode, length: u64) -> Self {
        let path = path.into();
        let name = base_name(&path).to_string();
        Self {
            path,
            name,
            mode,
            length,
            append_offset: 0,
            modified: None,
        }
    }

    pub fn with_modified(mut self, modified: Option<String>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_link(mut self) -> Self {
        self.mode.insert(ObjectMode::LINK);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ObjectMode {
        self.mode
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn append_offset(&self) -> u64 {
        self.append_offset
    }

    pub fn modified(&self) -> Option<&str> {
        self.modified.as_deref()
    }

    /// Force the next append position / 指定下一次追加位置
    ///
    /// The backend validates `offset` against the object's real length on the next
    /// append and rejects the write with `OffsetMismatch` if they disagree.
    pub fn set_append_offset(&mut self, offset: u64) {
        self.append_offset = offset;
    }

    pub(crate) fn advance_append(&mut self, written: u64) -> u64 {
        self.append_offset += written;
        self.length = self.append_offset;
        self.append_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits() {
        let mode = ObjectMode::READ | ObjectMode::APPEND;
        assert!(mode.is_read());
        assert!(mode.is_append());
        assert!(!mode.is_dir());
        assert_eq!(format!("{:?}", mode), "READ|APPEND");
        assert_eq!(format!("{:?}", ObjectMode::empty()), "EMPTY");
    }

    #[test]
    fn test_appendable_starts_at_length() {
        let desc = ObjectDescriptor::appendable("/work/log.txt", 42);
        assert_eq!(desc.name(), "log.txt");
        assert_eq!(desc.length(), 42);
        assert_eq!(desc.append_offset(), 42);
        assert!(desc.mode().is_append());
    }

    #[test]
    fn test_advance_append() {
        let mut desc = ObjectDescriptor::appendable("/log.txt", 0);
        assert_eq!(desc.advance_append(100), 100);
        assert_eq!(desc.advance_append(50), 150);
        assert_eq!(desc.length(), 150);
    }
}
