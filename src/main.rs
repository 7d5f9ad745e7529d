use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storager::storage::capability;
use storager::{config, CapabilityKind, FsView, StorageManager, Storager};

/// Append to a fresh object, returning its path / 追加写入新文件
async fn append_to_new_file(store: &dyn Storager) -> anyhow::Result<String> {
    let appender = capability::appender(store)?;
    let path = format!("demo/append-{}.log", uuid::Uuid::new_v4());

    let mut object = appender.create_append(&path).await?;
    for i in 0..3 {
        let line = format!("line {} written at {}\n", i, chrono::Utc::now().to_rfc3339());
        let next = appender
            .write_append(&mut object, &mut line.as_bytes(), line.len() as u64)
            .await
            .with_context(|| format!("append to {}", path))?;
        tracing::info!("{}: appended {} bytes, next offset {}", store.name(), line.len(), next);
    }

    Ok(path)
}

/// Resume appending from a fresh stat / 基于 stat 继续追加
async fn append_to_existing_file(store: &dyn Storager, path: &str) -> anyhow::Result<()> {
    let appender = capability::appender(store)?;

    let mut object = store.stat(path).await?;
    if !object.mode().is_append() || !object.mode().is_read() {
        bail!("{} is not appendable (mode {:?})", path, object.mode());
    }
    tracing::info!("{}: resuming {} at offset {}", store.name(), path, object.append_offset());

    let tail = b"resumed\n";
    let next = appender
        .write_append(&mut object, &mut &tail[..], tail.len() as u64)
        .await?;
    tracing::info!("{}: next offset {}", store.name(), next);
    Ok(())
}

/// Exercise the filesystem view / 演示文件系统视图
async fn fs_view_demo(view: &FsView, path: &str) -> anyhow::Result<()> {
    let name = view.storager().name().to_string();

    match view.open(path).await {
        Ok(mut file) => {
            let mut head = vec![0u8; 16];
            let n = file.read(&mut head).await?;
            tracing::info!("{}: open {} ({} bytes), first {} bytes read", name, path, file.stat().size, n);
            file.close()?;
        }
        Err(e) => tracing::warn!("{}: open skipped: {}", name, e),
    }

    match view.read_file(path).await {
        Ok(data) => tracing::info!("{}: read_file {} -> {} bytes", name, path, data.len()),
        Err(e) => tracing::warn!("{}: read_file skipped: {}", name, e),
    }

    match view.read_dir("demo").await {
        Ok(entries) => {
            for entry in entries {
                tracing::info!("{}: read_dir demo/{} ({:?})", name, entry.name, entry.file_type);
            }
        }
        Err(e) => tracing::warn!("{}: read_dir skipped: {}", name, e),
    }

    match view.glob("demo/*.log").await {
        Ok(names) => tracing::info!("{}: glob demo/*.log -> {:?}", name, names),
        Err(e) => tracing::warn!("{}: glob skipped: {}", name, e),
    }

    match view.stat_path(path).await {
        Ok(info) => tracing::info!("{}: stat {} -> {:?}", name, path, info),
        Err(e) => tracing::warn!("{}: stat skipped: {}", name, e),
    }

    Ok(())
}

async fn run_service(id: &str, store: Arc<dyn Storager>) -> anyhow::Result<()> {
    tracing::info!(
        "== {} ({}, work_dir={}, capabilities={:?})",
        id,
        store.name(),
        store.work_dir(),
        store.capabilities().supported()
    );

    let path = if capability::supports(store.as_ref(), CapabilityKind::Append) {
        let path = append_to_new_file(store.as_ref()).await?;
        append_to_existing_file(store.as_ref(), &path).await?;
        path
    } else {
        let path = format!("demo/object-{}.txt", uuid::Uuid::new_v4());
        let body = b"hello from storager\n";
        let object = store.create(&path).await?;
        store.write(&object, &mut &body[..], body.len() as u64).await?;
        path
    };

    fs_view_demo(&FsView::new(store.clone()), &path).await?;

    store.delete(&path).await?;
    tracing::info!("{}: removed {}", id, path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storager=debug,storager_demo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("storager {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));

    // Load configuration / 加载配置
    let app_config = config::load_config().context("Failed to load configuration")?;
    let only = std::env::args().nth(1);

    let manager = StorageManager::with_builtin_drivers();
    let services = app_config.build(&manager);
    if services.is_empty() {
        bail!("no usable service in {:?}", config::get_config_path());
    }

    for (id, store) in services {
        if only.as_deref().map_or(false, |o| o != id) {
            continue;
        }
        if let Err(e) = run_service(&id, store).await {
            tracing::error!("{}: demo failed: {:#}", id, e);
        }
    }

    Ok(())
}
