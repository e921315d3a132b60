// 路径安全守卫
//
// 把客户端传入的相对路径解析为共享根目录下的绝对路径，防止路径穿越

use std::path::{Component, Path, PathBuf};

use super::types::{FsError, FsErrorCode};

/// 路径安全守卫
///
/// 先在虚拟根上规范化 `.` / `..`，再拼接到根目录并规范化真实路径，
/// 最后确认结果仍位于根目录之下
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// 创建新的路径守卫，根目录必须已存在
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsError> {
        let root = root.as_ref();
        let canonical = dunce::canonicalize(root)
            .map_err(|e| FsError::io(e, root.to_string_lossy().to_string()))?;
        if !canonical.is_dir() {
            return Err(FsError::new(FsErrorCode::NotFound)
                .with_message("Root is not a directory")
                .with_path(root.to_string_lossy().to_string()));
        }
        Ok(Self { root: canonical })
    }

    /// 规范化后的根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 在虚拟根上规范化客户端路径，返回各层名称
    ///
    /// 不访问真实文件系统；`..` 越过虚拟根时返回 OutOfBounds
    pub fn normalize(path: &str) -> Result<Vec<String>, FsError> {
        if path.contains('\0') {
            return Err(FsError::bad_request("Path contains NUL byte").with_path(path));
        }

        let mut segments: Vec<String> = Vec::new();
        for segment in path.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(FsError::out_of_bounds(path));
                    }
                }
                name => {
                    // 拒绝盘符等非普通路径分量
                    let mut components = Path::new(name).components();
                    match (components.next(), components.next()) {
                        (Some(Component::Normal(_)), None) => segments.push(name.to_string()),
                        _ => {
                            return Err(FsError::bad_request("Invalid path segment").with_path(path));
                        }
                    }
                }
            }
        }
        Ok(segments)
    }

    /// 解析客户端路径为根目录下的绝对路径
    ///
    /// 路径末尾可以尚不存在（上传、新建目录）；已存在的最长前缀会被规范化，
    /// 符号链接指向根目录之外时返回 OutOfBounds
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let segments = Self::normalize(path)?;
        let joined = segments.iter().fold(self.root.clone(), |acc, s| acc.join(s));

        // 找到最长的已存在前缀
        let mut existing = joined.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        while existing.symlink_metadata().is_err() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name);
                    existing = parent;
                }
                _ => return Err(FsError::out_of_bounds(path)),
            }
        }

        let canonical = dunce::canonicalize(existing).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                // 悬空符号链接
                FsError::not_found(path)
            } else {
                FsError::io(e, path)
            }
        })?;

        if !canonical.starts_with(&self.root) {
            tracing::warn!("拒绝越界路径: {} -> {:?}", path, canonical);
            return Err(FsError::out_of_bounds(path));
        }

        Ok(tail.iter().rev().fold(canonical, |acc, name| acc.join(name)))
    }

    /// 解析条目本身（不跟随末端的符号链接）
    ///
    /// 父目录完整规范化并校验，末端名称原样拼接；用于删除、重命名
    pub fn resolve_entry(&self, path: &str) -> Result<PathBuf, FsError> {
        let mut segments = Self::normalize(path)?;
        let Some(leaf) = segments.pop() else {
            return Ok(self.root.clone());
        };
        let parent = self.resolve(&segments.join("/"))?;
        Ok(parent.join(leaf))
    }

    /// 把根目录下的绝对路径转换为客户端路径（以 / 开头）
    pub fn to_client_path(&self, absolute: &Path) -> String {
        let relative = absolute.strip_prefix(&self.root).unwrap_or(absolute);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    /// 拼接客户端目录和名称
    pub fn join_client(dir: &str, name: &str) -> String {
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            format!("/{}", name)
        } else if dir.starts_with('/') {
            format!("{}/{}", dir, name)
        } else {
            format!("/{}/{}", dir, name)
        }
    }

    /// 判断绝对路径是否为根目录本身
    pub fn is_root(&self, absolute: &Path) -> bool {
        absolute == self.root
    }
}
