use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio_stream::wrappers::ReadDirStream;

use crate::error::{Result, StorageError};
use crate::storage::{
    collect_dir, glob_by_listing, read_exact_size, Appender, ByteSource, Capability, CreateAppendPolicy, DirLister,
    Globber, ListMode, ObjectDescriptor, ObjectReader, ObjectStream, Storager,
};
use crate::utils::{base_name, resolve, validate_object_path};

pub struct LocalDriver {
    work_dir: String,
    list_mode: ListMode,
    capability: Capability,
}

impl LocalDriver {
    pub fn new(work_dir: String, list_mode: ListMode, max_append_size: Option<u64>) -> Self {
        Self {
            work_dir,
            list_mode,
            capability: Capability {
                can_append: true,
                can_read: true,
                can_dir_list: true,
                can_glob: true,
                can_stat: true,
                max_append_size,
                create_append_policy: CreateAppendPolicy::Truncate,
            },
        }
    }

    /// Resolve and validate a path naming an object / 解析对象路径
    fn object_path(&self, path: &str) -> Result<String> {
        let abs = resolve(&self.work_dir, path);
        validate_object_path(&abs)?;
        Ok(abs)
    }

    /// Resolve a path that may name a directory / 解析目录路径
    fn any_path(&self, path: &str) -> Result<String> {
        let abs = resolve(&self.work_dir, path);
        if abs.split('/').any(|part| part == "..") {
            return Err(StorageError::invalid_path(&abs, "parent directory components are not allowed"));
        }
        Ok(abs)
    }
}

#[async_trait]
impl Storager for LocalDriver {
    fn name(&self) -> &str {
        "fs"
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
        let path = object.path().to_string();
        validate_object_path(&path)?;

        let target = PathBuf::from(&path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, &path))?;
        }

        // 先写临时文件再重命名，调用方看不到半写状态
        let tmp = target.with_file_name(format!(".{}.{}.tmp", base_name(&path), uuid::Uuid::new_v4().simple()));
        let copied = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            let mut limited = (&mut *reader).take(size);
            let n = tokio::io::copy(&mut limited, &mut file).await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(n)
        }
        .await;

        match copied {
            Ok(n) if n == size => {
                if let Err(e) = tokio::fs::rename(&tmp, &target).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(StorageError::from_io(e, &path));
                }
                tracing::debug!("fs write {} ({} bytes)", path, n);
                Ok(n)
            }
            Ok(n) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(StorageError::Unexpected(format!(
                    "source ended after {} of {} bytes for {}",
                    n, size, path
                )))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(StorageError::from_io(e, &path))
            }
        }
    }

    async fn read(&self, path: &str) -> Result<ObjectReader> {
        let abs = self.object_path(path)?;
        let file = tokio::fs::File::open(&abs)
            .await
            .map_err(|e| StorageError::from_io(e, &abs))?;

        let metadata = file.metadata().await.map_err(|e| StorageError::from_io(e, &abs))?;
        if metadata.is_dir() {
            return Err(StorageError::invalid_path(&abs, "is a directory"));
        }
        Ok(Box::new(file))
    }

    async fn stat(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = self.any_path(path)?;
        describe(&abs).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.object_path(path)?;

        let metadata = match tokio::fs::symlink_metadata(&abs).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::from_io(e, &abs)),
        };

        // 只删除空目录，与对象存储按键删除保持一致
        let removed = if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(&abs)
                .await
                .map_err(|e| StorageError::from_io(e, &abs))?;
            let has_children = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(e, &abs))?
                .is_some();
            if has_children {
                return Err(StorageError::invalid_path(&abs, "directory is not empty"));
            }
            tokio::fs::remove_dir(&abs).await
        } else {
            tokio::fs::remove_file(&abs).await
        };
        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, &abs)),
        }
    }

    async fn list_with(&self, prefix: &str, mode: ListMode) -> Result<ObjectStream> {
        let dir = self.any_path(prefix)?;

        match mode {
            ListMode::Dir => {
                let entries = tokio::fs::read_dir(&dir)
                    .await
                    .map_err(|e| StorageError::from_io(e, &dir))?;

                let stream = ReadDirStream::new(entries).then(move |entry| async move {
                    let entry = entry.map_err(|e| StorageError::from_io(e, ""))?;
                    let path = entry.path().to_string_lossy().to_string();
                    describe(&path).await
                });
                Ok(stream.boxed())
            }
            ListMode::Prefix => {
                match tokio::fs::metadata(&dir).await {
                    Ok(_) => Ok(walk(PathBuf::from(dir))),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(futures::stream::empty::<Result<ObjectDescriptor>>().boxed())
                    }
                    Err(e) => Err(StorageError::from_io(e, &dir)),
                }
            }
        }
    }

    fn as_appender(&self) -> Option<&dyn Appender> {
        Some(self)
    }

    fn as_dir_lister(&self) -> Option<&dyn DirLister> {
        Some(self)
    }

    fn as_globber(&self) -> Option<&dyn Globber> {
        Some(self)
    }
}

#[async_trait]
impl Appender for LocalDriver {
    async fn create_append(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = self.object_path(path)?;

        if let Some(parent) = Path::new(&abs).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, &abs))?;
        }
        let locked_path = abs.clone();
        tokio::task::spawn_blocking(move || truncate_locked(&locked_path))
            .await
            .map_err(|e| StorageError::Unexpected(format!("create_append task failed: {}", e)))??;

        tracing::debug!("fs create_append {}", abs);
        Ok(ObjectDescriptor::appendable(abs, 0))
    }

    async fn write_append(&self, object: &mut ObjectDescriptor, reader: ByteSource<'_>, size: u64) -> Result<u64> {
        if !object.mode().is_append() {
            return Err(StorageError::Unexpected(format!("object {} is not appendable", object.path())));
        }
        let path = object.path().to_string();
        validate_object_path(&path)?;

        let data = read_exact_size(reader, size).await?;
        let held = object.append_offset();
        let max = self.capability.max_append_size;

        let locked_path = path.clone();
        let next = tokio::task::spawn_blocking(move || append_locked(&locked_path, held, &data, max))
            .await
            .map_err(|e| StorageError::Unexpected(format!("append task failed: {}", e)))??;

        object.advance_append(size);
        tracing::debug!("fs append {} {} -> {}", path, held, next);
        Ok(next)
    }
}

#[async_trait]
impl DirLister for LocalDriver {
    async fn list_dir(&self, path: &str) -> Result<Vec<ObjectDescriptor>> {
        collect_dir(self, path).await
    }
}

#[async_trait]
impl Globber for LocalDriver {
    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        glob_by_listing(self, pattern).await
    }
}

/// Create or empty a file under the same lock appends take / 加锁清空
fn truncate_locked(path: &str) -> Result<()> {
    use fs2::FileExt;

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .map_err(|e| StorageError::from_io(e, path))?;
    FileExt::lock_exclusive(&file).map_err(|e| StorageError::from_io(e, path))?;

    let result = file
        .set_len(0)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::from_io(e, path));

    let _ = FileExt::unlock(&file);
    result
}

/// Check the real length and append under an exclusive file lock / 加锁追加
fn append_locked(path: &str, held: u64, data: &[u8], max: Option<u64>) -> Result<u64> {
    use fs2::FileExt;
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| StorageError::from_io(e, path))?;
    FileExt::lock_exclusive(&file).map_err(|e| StorageError::from_io(e, path))?;

    let mut apply = || -> Result<u64> {
        let actual = file.metadata().map_err(|e| StorageError::from_io(e, path))?.len();
        if actual != held {
            return Err(StorageError::OffsetMismatch {
                path: path.to_string(),
                held,
                actual,
            });
        }

        let next = held + data.len() as u64;
        if let Some(max) = max {
            if next > max {
                return Err(StorageError::QuotaExceeded(format!(
                    "{} would grow to {} bytes, limit is {}",
                    path, next, max
                )));
            }
        }

        file.write_all(data).map_err(|e| StorageError::from_io(e, path))?;
        file.sync_data().map_err(|e| StorageError::from_io(e, path))?;
        Ok(next)
    };
    let result = apply();

    let _ = FileExt::unlock(&file);
    result
}

/// Build a descriptor for an on-disk path / 生成对象描述
async fn describe(path: &str) -> Result<ObjectDescriptor> {
    let link = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| StorageError::from_io(e, path))?;
    let metadata = if link.file_type().is_symlink() {
        tokio::fs::metadata(path).await.unwrap_or(link.clone())
    } else {
        link.clone()
    };

    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0))
        .map(|dt| dt.to_rfc3339());

    let desc = if metadata.is_dir() {
        ObjectDescriptor::dir(path.trim_end_matches('/'))
    } else {
        ObjectDescriptor::appendable(path, metadata.len())
    };
    let desc = desc.with_modified(modified);

    if link.file_type().is_symlink() {
        Ok(desc.with_link())
    } else {
        Ok(desc)
    }
}

struct Walk {
    pending: Vec<PathBuf>,
    current: Option<tokio::fs::ReadDir>,
}

/// Lazy recursive listing of every file under `root` / 递归遍历
fn walk(root: PathBuf) -> ObjectStream {
    let state = Walk {
        pending: vec![root],
        current: None,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(entries) = state.current.as_mut() {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        let path_str = path.to_string_lossy().to_string();
                        match entry.file_type().await {
                            Ok(ft) if ft.is_dir() => state.pending.push(path),
                            Ok(_) => {
                                let item = describe(&path_str).await;
                                return Some((item, state));
                            }
                            Err(e) => return Some((Err(StorageError::from_io(e, &path_str)), state)),
                        }
                    }
                    Ok(None) => state.current = None,
                    Err(e) => {
                        state.current = None;
                        return Some((Err(StorageError::from_io(e, "")), state));
                    }
                }
            } else {
                let dir = state.pending.pop()?;
                match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => state.current = Some(entries),
                    Err(e) => {
                        let dir_str = dir.to_string_lossy().to_string();
                        return Some((Err(StorageError::from_io(e, &dir_str)), state));
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::random_bytes;
    use futures::TryStreamExt;
    use std::sync::Arc;

    fn driver(dir: &tempfile::TempDir) -> LocalDriver {
        let work_dir = crate::utils::normalize_work_dir(&dir.path().to_string_lossy());
        LocalDriver::new(work_dir, ListMode::Dir, None)
    }

    #[tokio::test]
    async fn test_write_then_stat() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        let content = random_bytes(4096);

        let object = store.create("nested/data.bin").await.unwrap();
        let n = store.write(&object, &mut content.as_slice(), 4096).await.unwrap();
        assert_eq!(n, 4096);

        let stat = store.stat(object.path()).await.unwrap();
        assert_eq!(stat.length(), 4096);
        assert!(stat.mode().is_read());

        let mut reader = store.read("nested/data.bin").await.unwrap();
        let mut back = Vec::new();
        reader.read_to_end(&mut back).await.unwrap();
        assert_eq!(back, content);
    }

    #[tokio::test]
    async fn test_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);

        let object = store.create("a.txt").await.unwrap();
        store.write(&object, &mut &b"first version"[..], 13).await.unwrap();
        store.write(&object, &mut &b"v2"[..], 2).await.unwrap();

        assert_eq!(store.stat("a.txt").await.unwrap().length(), 2);
    }

    #[tokio::test]
    async fn test_short_source_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);

        let object = store.create("short.txt").await.unwrap();
        let err = store.write(&object, &mut &b"abc"[..], 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);

        let err = store.stat("short.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);

        assert_eq!(store.stat("nope").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.read("nope").await.err().unwrap().kind(), ErrorKind::NotFound);
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);

        assert_eq!(store.create("../escape").await.unwrap_err().kind(), ErrorKind::InvalidPath);
        assert_eq!(store.create("dir/").await.unwrap_err().kind(), ErrorKind::InvalidPath);
    }

    #[tokio::test]
    async fn test_append_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);

        let mut object = store.create_append("log.txt").await.unwrap();
        assert_eq!(object.append_offset(), 0);
        assert_eq!(object.length(), 0);

        let first = random_bytes(100);
        let next = store.write_append(&mut object, &mut first.as_slice(), 100).await.unwrap();
        assert_eq!(next, 100);

        // A second writer still holding offset 100 after the next append
        let mut stale = object.clone();

        let second = random_bytes(50);
        let next = store.write_append(&mut object, &mut second.as_slice(), 50).await.unwrap();
        assert_eq!(next, 150);
        assert_eq!(store.stat("log.txt").await.unwrap().length(), 150);

        let err = store
            .write_append(&mut stale, &mut &b"late"[..], 4)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OffsetMismatch);
        assert_eq!(stale.append_offset(), 100);
        assert_eq!(store.stat("log.txt").await.unwrap().length(), 150);
    }

    #[tokio::test]
    async fn test_append_to_existing_file_via_stat() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        std::fs::write(dir.path().join("existing.log"), b"0123456789").unwrap();

        let mut object = store.stat("existing.log").await.unwrap();
        assert!(object.mode().is_append());
        assert!(object.mode().is_read());
        assert_eq!(object.append_offset(), 10);

        let next = store.write_append(&mut object, &mut &b"abc"[..], 3).await.unwrap();
        assert_eq!(next, 13);
        assert_eq!(std::fs::read(dir.path().join("existing.log")).unwrap(), b"0123456789abc");
    }

    #[tokio::test]
    async fn test_set_append_offset_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);

        let mut object = store.create_append("forced.log").await.unwrap();
        store.write_append(&mut object, &mut &b"12345"[..], 5).await.unwrap();

        object.set_append_offset(3);
        let err = store.write_append(&mut object, &mut &b"xx"[..], 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OffsetMismatch);

        object.set_append_offset(5);
        assert_eq!(store.write_append(&mut object, &mut &b"xx"[..], 2).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_create_append_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        std::fs::write(dir.path().join("restart.log"), b"old content").unwrap();

        let object = store.create_append("restart.log").await.unwrap();
        assert_eq!(object.append_offset(), 0);
        assert_eq!(store.stat("restart.log").await.unwrap().length(), 0);
        assert_eq!(store.capabilities().create_append_policy, CreateAppendPolicy::Truncate);
    }

    #[tokio::test]
    async fn test_append_limit() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = crate::utils::normalize_work_dir(&dir.path().to_string_lossy());
        let store = LocalDriver::new(work_dir, ListMode::Dir, Some(8));

        let mut object = store.create_append("small.log").await.unwrap();
        store.write_append(&mut object, &mut &b"123456"[..], 6).await.unwrap();
        let err = store.write_append(&mut object, &mut &b"789"[..], 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(store.stat("small.log").await.unwrap().length(), 6);
    }

    #[tokio::test]
    async fn test_concurrent_appends_one_loses() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(driver(&dir));
        let object = store.create_append("race.log").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let mut object = object.clone();
            handles.push(tokio::spawn(async move {
                let data = random_bytes(64);
                store.write_append(&mut object, &mut data.as_slice(), 64).await
            }));
        }

        let mut ok = 0;
        let mut mismatched = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(next) => {
                    assert_eq!(next, 64);
                    ok += 1;
                }
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::OffsetMismatch);
                    mismatched += 1;
                }
            }
        }
        assert_eq!((ok, mismatched), (1, 1));
        assert_eq!(store.stat("race.log").await.unwrap().length(), 64);
    }

    #[tokio::test]
    async fn test_list_modes() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        std::fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("sub/mid.txt"), b"22").unwrap();
        std::fs::write(dir.path().join("sub/deeper/leaf.txt"), b"333").unwrap();

        let mut names: Vec<String> = store
            .list_with("", ListMode::Dir)
            .await
            .unwrap()
            .map_ok(|o| o.name().to_string())
            .try_collect()
            .await
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["sub", "top.txt"]);

        let mut sizes: Vec<u64> = store
            .list_with("", ListMode::Prefix)
            .await
            .unwrap()
            .map_ok(|o| o.length())
            .try_collect()
            .await
            .unwrap();
        sizes.sort();
        assert_eq!(sizes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_glob() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();
        std::fs::write(dir.path().join("c.md"), b"").unwrap();
        std::fs::write(dir.path().join("logs/d.txt"), b"").unwrap();

        assert_eq!(store.glob("*.txt").await.unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(store.glob("logs/*.txt").await.unwrap(), vec!["logs/d.txt"]);
    }

    #[tokio::test]
    async fn test_delete_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        std::fs::create_dir_all(dir.path().join("kept/inner")).unwrap();
        std::fs::write(dir.path().join("kept/inner/x"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let err = store.delete("kept").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
        assert_eq!(store.stat("kept/inner/x").await.unwrap().length(), 1);

        store.delete("empty").await.unwrap();
        assert!(!dir.path().join("empty").exists());
    }

    #[tokio::test]
    async fn test_create_append_waits_for_inflight_append() {
        use fs2::FileExt;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(driver(&dir));
        let file_path = dir.path().join("busy.log");
        std::fs::write(&file_path, random_bytes(100)).unwrap();
        let stale = store.stat("busy.log").await.unwrap();

        // An appender in the middle of its locked section
        let holder = std::fs::OpenOptions::new().append(true).open(&file_path).unwrap();
        holder.lock_exclusive().unwrap();

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.create_append("busy.log").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!task.is_finished());
        assert_eq!(std::fs::metadata(&file_path).unwrap().len(), 100);

        holder.unlock().unwrap();
        let fresh = task.await.unwrap().unwrap();
        assert_eq!(fresh.append_offset(), 0);
        assert_eq!(std::fs::metadata(&file_path).unwrap().len(), 0);

        let mut stale = stale;
        let err = store
            .write_append(&mut stale, &mut &b"late"[..], 4)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OffsetMismatch);
        assert_eq!(std::fs::metadata(&file_path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_prefix_listing_surfaces_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = driver(&dir);
        std::fs::write(dir.path().join("plain.txt"), b"x").unwrap();

        let missing: Vec<ObjectDescriptor> = store
            .list_with("absent", ListMode::Prefix)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(missing.is_empty());

        // A path below a regular file is ENOTDIR, not an empty prefix
        assert!(store.list_with("plain.txt/sub", ListMode::Prefix).await.is_err());
    }
}
