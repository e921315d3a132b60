// 文件系统服务
//
// 提供目录列表以及删除、重命名、新建目录等变更操作

use std::fs::{self, DirEntry};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

use super::guard::PathGuard;
use super::types::*;

/// 重命名成功后的新旧客户端路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub old_path: String,
    pub new_path: String,
}

/// 文件系统服务
#[derive(Debug, Clone)]
pub struct FilesystemService {
    guard: PathGuard,
    show_hidden: bool,
}

impl FilesystemService {
    /// 创建新的文件系统服务
    pub fn new(config: &FilesystemConfig) -> Result<Self, FsError> {
        Ok(Self {
            guard: PathGuard::new(&config.root_dir)?,
            show_hidden: config.show_hidden,
        })
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// 解析并要求目标为已存在的目录
    pub fn resolve_dir(&self, path: &str) -> Result<PathBuf, FsError> {
        let dir = self.guard.resolve(path)?;
        if !dir.is_dir() {
            return Err(FsError::not_found(path).with_message("Directory not found"));
        }
        Ok(dir)
    }

    /// 解析并要求目标为已存在的普通文件
    pub fn resolve_file(&self, path: &str) -> Result<PathBuf, FsError> {
        let file = self.guard.resolve(path)?;
        if !file.is_file() {
            return Err(FsError::not_found(path));
        }
        Ok(file)
    }

    /// 列出目录内容：目录在前，同组按名称升序
    pub fn list_directory(&self, path: &str) -> Result<ListResponse, FsError> {
        let dir = self.resolve_dir(path)?;

        let read_dir = fs::read_dir(&dir).map_err(|e| {
            tracing::error!("读取目录失败: {:?}, 错误: {}", dir, e);
            FsError::io(e, path)
        })?;

        let mut files: Vec<FileEntry> = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| self.show_hidden || !is_hidden(&entry.path()))
            .filter_map(|entry| self.to_file_entry(&entry).ok())
            .collect();

        sort_entries(&mut files);

        Ok(ListResponse {
            path: path.to_string(),
            files,
        })
    }

    /// 递归删除文件或目录
    ///
    /// 尽力删除：遇到失败继续处理其余条目，只要有一项失败就返回 false
    pub fn delete(&self, path: &str) -> Result<bool, FsError> {
        let target = self.guard.resolve_entry(path)?;
        let metadata = target
            .symlink_metadata()
            .map_err(|_| FsError::not_found(path))?;
        if self.guard.is_root(&target) {
            return Err(FsError::bad_request("Refusing to delete the shared root").with_path(path));
        }

        if !metadata.is_dir() {
            return Ok(log_failure(fs::remove_file(&target), &target));
        }

        let mut success = true;
        // contents_first: 先删子项再删目录；默认不跟随符号链接
        for entry in WalkDir::new(&target).contents_first(true) {
            match entry {
                Ok(entry) => {
                    let result = if entry.file_type().is_dir() {
                        fs::remove_dir(entry.path())
                    } else {
                        fs::remove_file(entry.path())
                    };
                    success &= log_failure(result, entry.path());
                }
                Err(e) => {
                    tracing::warn!("遍历删除目录失败: {:?}, 错误: {}", target, e);
                    success = false;
                }
            }
        }
        Ok(success)
    }

    /// 在同一父目录内重命名
    ///
    /// 返回 None 表示底层重命名失败
    pub fn rename(&self, old_path: &str, new_name: &str) -> Result<Option<Renamed>, FsError> {
        let new_name = validate_leaf_name(new_name)?;
        let source = self.guard.resolve_entry(old_path)?;
        if source.symlink_metadata().is_err() {
            return Err(FsError::not_found(old_path));
        }
        if self.guard.is_root(&source) {
            return Err(FsError::bad_request("Refusing to rename the shared root").with_path(old_path));
        }

        let parent = source
            .parent()
            .map(|p| self.guard.to_client_path(p))
            .unwrap_or_else(|| "/".to_string());
        let new_client = PathGuard::join_client(&parent, new_name);
        let destination = self.guard.resolve_entry(&new_client)?;

        match fs::rename(&source, &destination) {
            Ok(()) => Ok(Some(Renamed {
                old_path: self.guard.to_client_path(&source),
                new_path: new_client,
            })),
            Err(e) => {
                tracing::warn!("重命名失败: {:?} -> {:?}, 错误: {}", source, destination, e);
                Ok(None)
            }
        }
    }

    /// 在已存在的目录下新建一层子目录
    ///
    /// 返回 None 表示已存在或创建失败
    pub fn mkdir(&self, parent: &str, name: &str) -> Result<Option<String>, FsError> {
        let name = validate_leaf_name(name)?;
        let parent_dir = self.resolve_dir(parent)?;

        let client_path = PathGuard::join_client(&self.guard.to_client_path(&parent_dir), name);
        let target = self.guard.resolve(&client_path)?;

        match fs::create_dir(&target) {
            Ok(()) => Ok(Some(client_path)),
            Err(e) => {
                tracing::warn!("新建目录失败: {:?}, 错误: {}", target, e);
                Ok(None)
            }
        }
    }

    /// 将 DirEntry 转换为 FileEntry
    fn to_file_entry(&self, entry: &DirEntry) -> Result<FileEntry, FsError> {
        let path = entry.path();
        // 跟随符号链接取目标的元数据
        let metadata = fs::metadata(&path).map_err(|e| {
            FsError::io(e, path.to_string_lossy().to_string())
        })?;

        let is_directory = metadata.is_dir();
        let modified = metadata
            .modified()
            .ok()
            .map(system_time_to_millis)
            .unwrap_or_default();

        Ok(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: self.guard.to_client_path(&path),
            is_directory,
            size: if is_directory { 0 } else { metadata.len() },
            modified,
        })
    }
}

/// 目录在前，同组按名称升序（逐字节比较）
fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// 以 . 开头视为隐藏文件
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn log_failure(result: io::Result<()>, path: &Path) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("删除失败: {:?}, 错误: {}", path, e);
            false
        }
    }
}

/// 将 SystemTime 转换为 Unix 毫秒
fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
