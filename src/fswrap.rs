//! Filesystem view over a storager / 文件系统视图
//!
//! Presents a handle as a read-only filesystem. Every optional operation
//! checks the handle's capabilities before touching the backend and fails
//! with `CapabilityUnsupported` when the capability is missing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::Result;
use crate::storage::{capability, CapabilityKind, ObjectDescriptor, ObjectReader, Storager};

/// Entry type reported by `read_dir` / 目录项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

impl FileType {
    fn of(object: &ObjectDescriptor) -> Self {
        let mode = object.mode();
        if mode.is_link() {
            FileType::Symlink
        } else if mode.is_dir() {
            FileType::Dir
        } else {
            FileType::File
        }
    }
}

/// One directory entry / 目录项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

/// File metadata / 文件信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<String>,
}

impl From<&ObjectDescriptor> for FileInfo {
    fn from(object: &ObjectDescriptor) -> Self {
        Self {
            name: object.name().to_string(),
            size: object.length(),
            is_dir: object.mode().is_dir(),
            modified: object.modified().map(str::to_string),
        }
    }
}

/// Open file: a read stream plus the metadata captured at open time / 打开的文件
pub struct FsFile {
    reader: ObjectReader,
    info: FileInfo,
}

impl FsFile {
    pub fn stat(&self) -> &FileInfo {
        &self.info
    }

    /// Release the read session / 关闭文件
    pub fn close(self) -> Result<()> {
        drop(self.reader);
        Ok(())
    }
}

impl AsyncRead for FsFile {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Filesystem view / 文件系统视图
#[derive(Clone)]
pub struct FsView {
    store: Arc<dyn Storager>,
}

impl FsView {
    pub fn new(store: Arc<dyn Storager>) -> Self {
        Self { store }
    }

    pub fn storager(&self) -> &Arc<dyn Storager> {
        &self.store
    }

    /// Open a file for reading / 打开文件
    pub async fn open(&self, path: &str) -> Result<FsFile> {
        let object = self.store.stat(path).await?;
        if object.mode().is_dir() {
            return Err(crate::error::StorageError::invalid_path(object.path(), "is a directory"));
        }
        let reader = self.store.read(path).await?;

        Ok(FsFile {
            reader,
            info: FileInfo::from(&object),
        })
    }

    /// Read a whole file / 读取整个文件
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        capability::require(self.store.as_ref(), CapabilityKind::Read)?;
        let mut reader = self.store.read(path).await?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| crate::error::StorageError::from_io(e, path))?;
        Ok(data)
    }

    /// List one directory level, sorted by name / 列出目录
    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let lister = capability::dir_lister(self.store.as_ref())?;
        let mut entries: Vec<DirEntry> = lister
            .list_dir(path)
            .await?
            .iter()
            .map(|object| DirEntry {
                name: object.name().to_string(),
                file_type: FileType::of(object),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Names matching a shell pattern, relative to the working directory / 通配符匹配
    pub async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let globber = capability::globber(self.store.as_ref())?;
        let mut names = globber.glob(pattern).await?;
        names.sort();
        Ok(names)
    }

    /// File metadata / 获取文件信息
    pub async fn stat_path(&self, path: &str) -> Result<FileInfo> {
        capability::require(self.store.as_ref(), CapabilityKind::Stat)?;
        let object = self.store.stat(path).await?;
        Ok(FileInfo::from(&object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryDriver;
    use crate::error::ErrorKind;
    use crate::storage::{ByteSource, Capability, ListMode, ObjectStream};
    use async_trait::async_trait;

    async fn populated() -> FsView {
        let store = MemoryDriver::new("/fs/".to_string(), ListMode::Dir, None);
        for (path, body) in [("hello.txt", "hello"), ("b.txt", "bb"), ("sub/c.log", "ccc")] {
            let object = store.create(path).await.unwrap();
            store.write(&object, &mut body.as_bytes(), body.len() as u64).await.unwrap();
        }
        FsView::new(Arc::new(store))
    }

    /// Declares nothing; any backend call is a test failure.
    struct Bare(Capability);

    #[async_trait]
    impl Storager for Bare {
        fn name(&self) -> &str {
            "bare"
        }
        fn work_dir(&self) -> &str {
            "/"
        }
        fn capabilities(&self) -> &Capability {
            &self.0
        }
        fn list_mode(&self) -> ListMode {
            ListMode::Dir
        }
        async fn create(&self, _: &str) -> Result<ObjectDescriptor> {
            unreachable!("backend called")
        }
        async fn write(&self, _: &ObjectDescriptor, _: ByteSource<'_>, _: u64) -> Result<u64> {
            unreachable!("backend called")
        }
        async fn read(&self, _: &str) -> Result<ObjectReader> {
            unreachable!("backend called")
        }
        async fn stat(&self, _: &str) -> Result<ObjectDescriptor> {
            unreachable!("backend called")
        }
        async fn delete(&self, _: &str) -> Result<()> {
            unreachable!("backend called")
        }
        async fn list_with(&self, _: &str, _: ListMode) -> Result<ObjectStream> {
            unreachable!("backend called")
        }
    }

    #[tokio::test]
    async fn test_open_and_read() {
        let view = populated().await;

        let mut file = view.open("hello.txt").await.unwrap();
        assert_eq!(file.stat().size, 5);
        assert_eq!(file.stat().name, "hello.txt");
        let mut body = String::new();
        file.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "hello");
        file.close().unwrap();

        assert_eq!(view.read_file("b.txt").await.unwrap(), b"bb");
        assert_eq!(view.open("missing").await.err().map(|e| e.kind()), Some(ErrorKind::NotFound));
        assert_eq!(view.open("sub").await.err().map(|e| e.kind()), Some(ErrorKind::InvalidPath));
    }

    #[tokio::test]
    async fn test_read_dir_sorted() {
        let view = populated().await;
        let entries = view.read_dir("").await.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "b.txt".into(), file_type: FileType::File },
                DirEntry { name: "hello.txt".into(), file_type: FileType::File },
                DirEntry { name: "sub".into(), file_type: FileType::Dir },
            ]
        );
    }

    #[tokio::test]
    async fn test_glob_and_stat() {
        let view = populated().await;
        assert_eq!(view.glob("*.txt").await.unwrap(), vec!["b.txt", "hello.txt"]);
        assert_eq!(view.glob("sub/?.log").await.unwrap(), vec!["sub/c.log"]);

        let info = view.stat_path("sub/c.log").await.unwrap();
        assert_eq!(info.name, "c.log");
        assert_eq!(info.size, 3);
        assert!(!info.is_dir);
        assert!(view.stat_path("sub").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_missing_capabilities_fail_before_backend() {
        let view = FsView::new(Arc::new(Bare(Capability::default())));

        for err in [
            view.read_file("a").await.err(),
            view.read_dir("").await.err(),
            view.glob("*").await.err(),
            view.stat_path("a").await.err(),
        ] {
            assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::CapabilityUnsupported));
        }
    }

    /// Memory store that declares only Stat among the optional capabilities.
    struct StatOnly {
        inner: MemoryDriver,
        capability: Capability,
    }

    #[async_trait]
    impl Storager for StatOnly {
        fn name(&self) -> &str {
            "stat-only"
        }
        fn work_dir(&self) -> &str {
            self.inner.work_dir()
        }
        fn capabilities(&self) -> &Capability {
            &self.capability
        }
        fn list_mode(&self) -> ListMode {
            self.inner.list_mode()
        }
        async fn create(&self, path: &str) -> Result<ObjectDescriptor> {
            self.inner.create(path).await
        }
        async fn write(&self, object: &ObjectDescriptor, reader: ByteSource<'_>, size: u64) -> Result<u64> {
            self.inner.write(object, reader, size).await
        }
        async fn read(&self, path: &str) -> Result<ObjectReader> {
            self.inner.read(path).await
        }
        async fn stat(&self, path: &str) -> Result<ObjectDescriptor> {
            self.inner.stat(path).await
        }
        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }
        async fn list_with(&self, prefix: &str, mode: ListMode) -> Result<ObjectStream> {
            self.inner.list_with(prefix, mode).await
        }
    }

    #[tokio::test]
    async fn test_open_needs_no_read_capability() {
        let inner = MemoryDriver::new("/fs/".to_string(), ListMode::Dir, None);
        let object = inner.create("a.txt").await.unwrap();
        inner.write(&object, &mut &b"abc"[..], 3).await.unwrap();
        let store = StatOnly {
            inner,
            capability: Capability {
                can_stat: true,
                ..Capability::default()
            },
        };
        let view = FsView::new(Arc::new(store));

        let mut file = view.open("a.txt").await.unwrap();
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"abc");
        assert_eq!(file.stat().size, 3);

        let err = view.read_file("a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
    }

    #[tokio::test]
    async fn test_glob_unsupported_on_drive() {
        let manager = crate::storage::StorageManager::with_builtin_drivers();
        let store = manager
            .new_storager_from_string("gdrive://view-test/?credential=oauth:id:secret:token")
            .unwrap();
        let view = FsView::new(store);

        let err = view.glob("*").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityUnsupported);
        assert!(err.to_string().contains("gdrive"));
    }
}
