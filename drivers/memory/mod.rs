//! In-memory driver / 内存存储驱动
//!
//! Objects live in a sorted map keyed by canonical path; directories are implied
//! by key prefixes. `create_append` is create-once: an existing object yields
//! `AlreadyExists`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;

use crate::error::{Result, StorageError};
use crate::storage::{
    collect_dir, glob_by_listing, read_exact_size, Appender, ByteSource, Capability, ConfigItem, CreateAppendPolicy,
    DirLister, DriverConfig, DriverFactory, DriverOptions, Globber, ListMode, ObjectDescriptor, ObjectReader,
    ObjectStream, Storager, StoragerBox,
};
use crate::utils::{resolve, validate_object_path};

struct MemoryObject {
    data: Arc<Vec<u8>>,
    modified: String,
}

pub struct MemoryDriver {
    work_dir: String,
    list_mode: ListMode,
    capability: Capability,
    objects: RwLock<BTreeMap<String, MemoryObject>>,
}

impl MemoryDriver {
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
                create_append_policy: CreateAppendPolicy::CreateOnce,
            },
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    fn object_path(&self, path: &str) -> Result<String> {
        let abs = resolve(&self.work_dir, path);
        validate_object_path(&abs)?;
        Ok(abs)
    }

    fn describe(path: &str, object: &MemoryObject) -> ObjectDescriptor {
        ObjectDescriptor::appendable(path, object.data.len() as u64).with_modified(Some(object.modified.clone()))
    }

    /// Snapshot of the entries under `dir` / 获取目录快照
    fn snapshot(&self, dir: &str, mode: ListMode) -> Vec<ObjectDescriptor> {
        let objects = self.objects.read();
        let mut out = Vec::new();
        let mut last_dir: Option<String> = None;

        for (key, object) in objects.range(dir.to_string()..) {
            let rest = match key.strip_prefix(dir) {
                Some(rest) => rest,
                None => break,
            };
            match (mode, rest.find('/')) {
                (ListMode::Dir, Some(pos)) => {
                    let child = format!("{}{}", dir, &rest[..pos]);
                    if last_dir.as_deref() != Some(child.as_str()) {
                        out.push(ObjectDescriptor::dir(child.clone()));
                        last_dir = Some(child);
                    }
                }
                _ => out.push(Self::describe(key, object)),
            }
        }
        out
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl Storager for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
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
        let data = read_exact_size(reader, size).await?;

        self.objects.write().insert(
            object.path().to_string(),
            MemoryObject {
                data: Arc::new(data),
                modified: now(),
            },
        );
        tracing::debug!("memory write {} ({} bytes)", object.path(), size);
        Ok(size)
    }

    async fn read(&self, path: &str) -> Result<ObjectReader> {
        let abs = self.object_path(path)?;
        let data = self
            .objects
            .read()
            .get(&abs)
            .map(|o| o.data.clone())
            .ok_or(StorageError::NotFound { path: abs })?;

        // Arc 共享快照，后续写入不影响已打开的读取流
        Ok(Box::new(std::io::Cursor::new(SharedBytes(data))))
    }

    async fn stat(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = resolve(&self.work_dir, path);
        let objects = self.objects.read();

        if let Some(object) = objects.get(abs.trim_end_matches('/')) {
            return Ok(Self::describe(abs.trim_end_matches('/'), object));
        }

        let dir = format!("{}/", abs.trim_end_matches('/'));
        let has_children = objects
            .range(dir.clone()..)
            .next()
            .map(|(key, _)| key.starts_with(&dir))
            .unwrap_or(false);
        if has_children {
            return Ok(ObjectDescriptor::dir(abs.trim_end_matches('/')));
        }

        Err(StorageError::NotFound { path: abs })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.object_path(path)?;
        self.objects.write().remove(&abs);
        Ok(())
    }

    async fn list_with(&self, prefix: &str, mode: ListMode) -> Result<ObjectStream> {
        let mut dir = resolve(&self.work_dir, prefix);
        if !dir.ends_with('/') {
            dir.push('/');
        }
        let entries = self.snapshot(&dir, mode);
        Ok(futures::stream::iter(entries.into_iter().map(Ok)).boxed())
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
impl Appender for MemoryDriver {
    async fn create_append(&self, path: &str) -> Result<ObjectDescriptor> {
        let abs = self.object_path(path)?;
        let mut objects = self.objects.write();

        if objects.contains_key(&abs) {
            return Err(StorageError::AlreadyExists { path: abs });
        }
        objects.insert(
            abs.clone(),
            MemoryObject {
                data: Arc::new(Vec::new()),
                modified: now(),
            },
        );
        Ok(ObjectDescriptor::appendable(abs, 0))
    }

    async fn write_append(&self, object: &mut ObjectDescriptor, reader: ByteSource<'_>, size: u64) -> Result<u64> {
        if !object.mode().is_append() {
            return Err(StorageError::Unexpected(format!("object {} is not appendable", object.path())));
        }
        let data = read_exact_size(reader, size).await?;
        let held = object.append_offset();

        {
            let mut objects = self.objects.write();
            let stored = objects
                .get_mut(object.path())
                .ok_or_else(|| StorageError::NotFound { path: object.path().to_string() })?;

            let actual = stored.data.len() as u64;
            if actual != held {
                return Err(StorageError::OffsetMismatch {
                    path: object.path().to_string(),
                    held,
                    actual,
                });
            }
            if let Some(max) = self.capability.max_append_size {
                if held + size > max {
                    return Err(StorageError::QuotaExceeded(format!(
                        "{} would grow to {} bytes, limit is {}",
                        object.path(),
                        held + size,
                        max
                    )));
                }
            }

            Arc::make_mut(&mut stored.data).extend_from_slice(&data);
            stored.modified = now();
        }

        Ok(object.advance_append(size))
    }
}

#[async_trait]
impl DirLister for MemoryDriver {
    async fn list_dir(&self, path: &str) -> Result<Vec<ObjectDescriptor>> {
        collect_dir(self, path).await
    }
}

#[async_trait]
impl Globber for MemoryDriver {
    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        glob_by_listing(self, pattern).await
    }
}

/// Shared buffer readable through `Cursor` / 共享缓冲区
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub struct MemoryDriverFactory;

impl DriverFactory for MemoryDriverFactory {
    fn driver_type(&self) -> &'static str {
        "memory"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            default_list_mode: ListMode::Dir,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![ConfigItem::new("max_append_size", "number")
            .help("Largest size an object may reach through appends (bytes)")]
    }

    fn create_driver(&self, options: DriverOptions) -> Result<StoragerBox> {
        let max_append_size = options.config.get("max_append_size").and_then(|v| v.as_u64());
        Ok(Arc::new(MemoryDriver::new(options.work_dir, options.list_mode, max_append_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::capability;
    use crate::testing::random_bytes;
    use futures::TryStreamExt;
    use tokio::io::AsyncReadExt;

    fn driver() -> MemoryDriver {
        MemoryDriver::new("/work/".to_string(), ListMode::Dir, None)
    }

    #[tokio::test]
    async fn test_write_stat_round_trip() {
        let store = driver();
        let content = random_bytes(777);

        let object = store.create("a/b.bin").await.unwrap();
        assert_eq!(object.path(), "/work/a/b.bin");
        store.write(&object, &mut content.as_slice(), 777).await.unwrap();

        assert_eq!(store.stat(object.path()).await.unwrap().length(), 777);
        assert!(store.stat("a").await.unwrap().mode().is_dir());
    }

    #[tokio::test]
    async fn test_offsets_are_running_sums() {
        let store = driver();
        let mut object = store.create_append("log.txt").await.unwrap();

        let sizes = [13u64, 0, 400, 7, 1024];
        let mut running = 0;
        for size in sizes {
            let data = random_bytes(size as usize);
            let next = store.write_append(&mut object, &mut data.as_slice(), size).await.unwrap();
            running += size;
            assert_eq!(next, running);
            assert_eq!(object.append_offset(), running);
        }
        assert_eq!(store.stat("log.txt").await.unwrap().length(), running);
    }

    #[tokio::test]
    async fn test_stale_offset_rejected_without_write() {
        let store = driver();
        let mut object = store.create_append("log.txt").await.unwrap();
        store.write_append(&mut object, &mut &[1u8; 100][..], 100).await.unwrap();
        let mut stale = object.clone();
        store.write_append(&mut object, &mut &[2u8; 50][..], 50).await.unwrap();

        let err = store.write_append(&mut stale, &mut &[3u8; 10][..], 10).await.unwrap_err();
        match err {
            StorageError::OffsetMismatch { held, actual, .. } => {
                assert_eq!(held, 100);
                assert_eq!(actual, 150);
            }
            other => panic!("unexpected error: {}", other),
        }

        let mut reader = store.read("log.txt").await.unwrap();
        let mut back = Vec::new();
        reader.read_to_end(&mut back).await.unwrap();
        assert_eq!(back.len(), 150);
        assert!(back.iter().all(|b| *b != 3));
    }

    #[tokio::test]
    async fn test_create_append_is_create_once() {
        let store = driver();
        store.create_append("once.log").await.unwrap();
        let err = store.create_append("once.log").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_resync_after_out_of_band_change() {
        let store = driver();
        let mut object = store.create_append("shared.log").await.unwrap();

        // another handle rewrites the object behind our back
        let rewrite = store.create("shared.log").await.unwrap();
        store.write(&rewrite, &mut &b"0123456789"[..], 10).await.unwrap();

        let err = store.write_append(&mut object, &mut &b"x"[..], 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OffsetMismatch);

        let mut fresh = store.stat("shared.log").await.unwrap();
        assert_eq!(fresh.append_offset(), 10);
        assert_eq!(store.write_append(&mut fresh, &mut &b"x"[..], 1).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_open_reader_is_a_snapshot() {
        let store = driver();
        let mut object = store.create_append("snap.log").await.unwrap();
        store.write_append(&mut object, &mut &b"abc"[..], 3).await.unwrap();

        let mut reader = store.read("snap.log").await.unwrap();
        store.write_append(&mut object, &mut &b"def"[..], 3).await.unwrap();

        let mut back = Vec::new();
        reader.read_to_end(&mut back).await.unwrap();
        assert_eq!(back, b"abc");
    }

    #[tokio::test]
    async fn test_plain_descriptor_cannot_append() {
        let store = driver();
        let object = store.create("plain.bin").await.unwrap();
        store.write(&object, &mut &b"abc"[..], 3).await.unwrap();

        let mut plain = object.clone();
        let err = store.write_append(&mut plain, &mut &b"d"[..], 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(store.stat("plain.bin").await.unwrap().length(), 3);
    }

    #[tokio::test]
    async fn test_append_after_delete() {
        let store = driver();
        let mut object = store.create_append("gone.log").await.unwrap();
        store.delete("gone.log").await.unwrap();
        let err = store.write_append(&mut object, &mut &b"x"[..], 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_max_append_size_is_queryable() {
        let store = MemoryDriver::new("/".to_string(), ListMode::Dir, Some(4));
        assert_eq!(capability::max_append_size(&store).unwrap(), Some(4));

        let mut object = store.create_append("tiny").await.unwrap();
        let err = store.write_append(&mut object, &mut &b"12345"[..], 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(store.stat("tiny").await.unwrap().length(), 0);
    }

    #[tokio::test]
    async fn test_list_dir_and_prefix() {
        let store = driver();
        for path in ["a.txt", "docs/b.txt", "docs/c.txt", "docs/deep/d.txt"] {
            let object = store.create(path).await.unwrap();
            store.write(&object, &mut &b"x"[..], 1).await.unwrap();
        }

        let names: Vec<String> = store
            .list_with("", ListMode::Dir)
            .await
            .unwrap()
            .map_ok(|o| o.name().to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["a.txt", "docs"]);

        let docs = store.list_dir("docs").await.unwrap();
        let docs: Vec<(&str, bool)> = docs.iter().map(|o| (o.name(), o.mode().is_dir())).collect();
        assert_eq!(docs, vec![("b.txt", false), ("c.txt", false), ("deep", true)]);

        let all: Vec<ObjectDescriptor> = store
            .list_with("docs/", ListMode::Prefix)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_prefix_without_slash_lists_children() {
        let store = driver();
        for path in ["docs.txt", "docs/b.txt", "docs/c.txt", "docsx/e.txt"] {
            let object = store.create(path).await.unwrap();
            store.write(&object, &mut &b"x"[..], 1).await.unwrap();
        }

        for mode in [ListMode::Dir, ListMode::Prefix] {
            let names: Vec<String> = store
                .list_with("docs", mode)
                .await
                .unwrap()
                .map_ok(|o| o.path().to_string())
                .try_collect()
                .await
                .unwrap();
            assert_eq!(names, vec!["/work/docs/b.txt", "/work/docs/c.txt"]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_one_loses() {
        let store = Arc::new(driver());
        let object = store.create_append("race.log").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let mut object = object.clone();
            handles.push(tokio::spawn(async move {
                let data = random_bytes(32);
                store.write_append(&mut object, &mut data.as_slice(), 32).await
            }));
        }

        let mut kinds = Vec::new();
        for handle in handles {
            kinds.push(handle.await.unwrap().map_err(|e| e.kind()));
        }
        assert_eq!(kinds.iter().filter(|r| **r == Ok(32)).count(), 1);
        assert_eq!(kinds.iter().filter(|r| **r == Err(ErrorKind::OffsetMismatch)).count(), 1);
        assert_eq!(store.stat("race.log").await.unwrap().length(), 32);
    }

    #[tokio::test]
    async fn test_glob_relative_names() {
        let store = driver();
        for path in ["x.txt", "y.log", "sub/z.txt"] {
            let object = store.create(path).await.unwrap();
            store.write(&object, &mut &b""[..], 0).await.unwrap();
        }

        assert_eq!(store.glob("*.txt").await.unwrap(), vec!["x.txt"]);
        assert_eq!(store.glob("**/*.txt").await.unwrap(), vec!["sub/z.txt", "x.txt"]);
        assert_eq!(store.glob("[").await.unwrap_err().kind(), ErrorKind::InvalidPath);
    }
}
