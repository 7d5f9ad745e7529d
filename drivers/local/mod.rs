//! Local filesystem driver / 本地存储驱动
//!
//! `create_append` on an existing file truncates it and restarts at offset 0.

mod driver;

pub use driver::LocalDriver;
