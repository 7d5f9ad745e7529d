/// Path processing utility functions / 路径处理工具函数

use crate::error::{Result, StorageError};

/// Normalize a working directory: leading and trailing `/`, no duplicate `/`
/// 规范化工作目录
pub fn normalize_work_dir(work_dir: &str) -> String {
    let work_dir = work_dir.replace('\\', "/");
    let parts: Vec<&str> = work_dir.split('/').filter(|s| !s.is_empty()).collect();

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", parts.join("/"))
    }
}

/// Resolve a user supplied path against the working directory / 解析路径
///
/// Absolute paths are returned unchanged; relative paths are appended to
/// `work_dir` with exactly one separator between them.
pub fn resolve(work_dir: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }

    let joined = format!("{}/{}", work_dir, path);
    collapse_separators(&joined)
}

/// Collapse repeated `/` into one / 合并重复的 /
fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;

    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }

    out
}

/// Reject paths no backend can address / 校验对象路径
///
/// Called by adapters on canonical paths before any backend call.
pub fn validate_object_path(path: &str) -> Result<()> {
    if path.is_empty() || path == "/" {
        return Err(StorageError::invalid_path(path, "empty object path"));
    }
    if path.ends_with('/') {
        return Err(StorageError::invalid_path(path, "object path must not end with a separator"));
    }
    if path.contains('\0') {
        return Err(StorageError::invalid_path(path, "path contains NUL byte"));
    }
    if path.split('/').any(|part| part == "..") {
        return Err(StorageError::invalid_path(path, "parent directory components are not allowed"));
    }
    Ok(())
}

/// Last path segment / 获取路径最后一段
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Path relative to the working directory, used by directory and glob views
/// 获取相对于工作目录的路径
pub fn relative_to(work_dir: &str, path: &str) -> String {
    match path.strip_prefix(work_dir) {
        Some(rel) => rel.trim_start_matches('/').to_string(),
        None => path.trim_start_matches('/').to_string(),
    }
}

/// Parent directory of a canonical path, always ending with `/`
/// 获取父目录
pub fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => trimmed[..=pos].to_string(),
        None => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("/work/", "a/b"), "/work/a/b");
        assert_eq!(resolve("/work/", "/abs/c"), "/abs/c");
        assert_eq!(resolve("/work", "a/b"), "/work/a/b");
        assert_eq!(resolve("/work/", "a//b"), "/work/a/b");
        assert_eq!(resolve("/", "log.txt"), "/log.txt");
        assert_eq!(resolve("/work/", ""), "/work/");
    }

    #[test]
    fn test_absolute_paths_are_untouched() {
        assert_eq!(resolve("/work/", "//odd//path"), "//odd//path");
    }

    #[test]
    fn test_normalize_work_dir() {
        assert_eq!(normalize_work_dir(""), "/");
        assert_eq!(normalize_work_dir("/"), "/");
        assert_eq!(normalize_work_dir("work"), "/work/");
        assert_eq!(normalize_work_dir("/a//b/"), "/a/b/");
        assert_eq!(normalize_work_dir("a\\b"), "/a/b/");
    }

    #[test]
    fn test_validate_object_path() {
        assert!(validate_object_path("/work/a.txt").is_ok());
        assert!(validate_object_path("").is_err());
        assert!(validate_object_path("/").is_err());
        assert!(validate_object_path("/work/dir/").is_err());
        assert!(validate_object_path("/work/../etc/passwd").is_err());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(base_name("/work/a/b.txt"), "b.txt");
        assert_eq!(base_name("/work/a/"), "a");
        assert_eq!(relative_to("/work/", "/work/a/b.txt"), "a/b.txt");
        assert_eq!(relative_to("/work/", "/other/c"), "other/c");
        assert_eq!(parent_dir("/work/a/b.txt"), "/work/a/");
        assert_eq!(parent_dir("/top"), "/");
    }
}
