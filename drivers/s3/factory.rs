//! S3驱动工厂

use std::sync::Arc;

use super::config::S3Config;
use super::driver::S3Driver;
use crate::error::Result;
use crate::storage::{ConfigItem, DriverConfig, DriverFactory, DriverOptions, ListMode, StoragerBox};

fn common_s3_items(endpoint_required: bool) -> Vec<ConfigItem> {
    let endpoint = ConfigItem::new("endpoint", "string").help("Endpoint as <protocol>:<host>[:<port>], e.g. https:play.min.io:9000");
    vec![
        ConfigItem::new("name", "string").help("Bucket name").required(),
        ConfigItem::new("credential", "password")
            .help("hmac:<access_key_id>:<secret_access_key>")
            .required(),
        if endpoint_required { endpoint.required() } else { endpoint },
        ConfigItem::new("location", "string")
            .help("Region, e.g. us-east-1")
            .default("us-east-1"),
    ]
}

fn create(service: &'static str, options: DriverOptions, force_path_style: bool) -> Result<StoragerBox> {
    let config = S3Config::from_options(service, &options.config, force_path_style)?;
    tracing::info!(
        "{} driver initialized, bucket: {}, endpoint: {}",
        service,
        config.bucket,
        config.endpoint
    );
    Ok(Arc::new(S3Driver::new(service, options.work_dir, options.list_mode, config)?))
}

/// S3驱动工厂
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &'static str {
        "s3"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            default_list_mode: ListMode::Dir,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        common_s3_items(false)
    }

    fn create_driver(&self, options: DriverOptions) -> Result<StoragerBox> {
        create("s3", options, false)
    }
}

/// MinIO驱动工厂（强制路径风格）
pub struct MinioDriverFactory;

impl DriverFactory for MinioDriverFactory {
    fn driver_type(&self) -> &'static str {
        "minio"
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            default_list_mode: ListMode::Dir,
        }
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        common_s3_items(true)
    }

    fn create_driver(&self, options: DriverOptions) -> Result<StoragerBox> {
        create("minio", options, true)
    }
}
