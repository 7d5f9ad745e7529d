//! Shared helpers for unit tests / 测试辅助函数

use rand::RngCore;

/// Random payload of `len` bytes / 生成随机数据
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}
