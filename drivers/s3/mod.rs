//! S3-compatible object storage driver / S3 兼容对象存储驱动
//!
//! Serves both the `s3` and `minio` services; MinIO forces path-style
//! addressing and requires an explicit endpoint. Objects are whole-object
//! replace only, so the append extension is not offered.

mod config;
mod driver;
mod factory;

pub use config::S3Config;
pub use driver::S3Driver;
pub use factory::{MinioDriverFactory, S3DriverFactory};
