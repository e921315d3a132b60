// 文件系统模块数据类型定义

use serde::{Deserialize, Serialize};
use std::path::Path;

// 重新导出配置模块中的 FilesystemConfig
pub use crate::config::FilesystemConfig;

/// 文件系统错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorCode {
    /// 文件或目录不存在
    NotFound,
    /// 路径超出共享根目录
    OutOfBounds,
    /// 参数缺失或格式无效
    BadRequest,
    /// 底层 IO 失败
    IoFailure,
}

impl FsErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "File not found",
            Self::OutOfBounds => "Path is outside the shared root",
            Self::BadRequest => "Invalid request",
            Self::IoFailure => "I/O failure",
        }
    }
}

/// 文件系统错误
#[derive(Debug)]
pub struct FsError {
    pub code: FsErrorCode,
    pub message: String,
    pub path: Option<String>,
}

impl FsError {
    pub fn new(code: FsErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            path: None,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::new(FsErrorCode::NotFound).with_path(path)
    }

    pub fn out_of_bounds(path: impl Into<String>) -> Self {
        Self::new(FsErrorCode::OutOfBounds).with_path(path)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(FsErrorCode::BadRequest).with_message(message)
    }

    pub fn io(err: std::io::Error, path: impl Into<String>) -> Self {
        Self::new(FsErrorCode::IoFailure)
            .with_message(format!("I/O failure: {}", err))
            .with_path(path)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref path) = self.path {
            write!(f, "{}: {}", self.message, path)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for FsError {}

/// 文件条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// 文件名
    pub name: String,
    /// 相对共享根目录的路径（以 / 开头）
    pub path: String,
    /// 是否为目录
    pub is_directory: bool,
    /// 文件大小（目录为 0）
    pub size: u64,
    /// 修改时间（Unix 毫秒）
    pub modified: i64,
}

/// 列目录响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    /// 客户端请求的路径
    pub path: String,
    /// 文件条目列表（目录在前）
    pub files: Vec<FileEntry>,
}

/// 列目录 / 下载 / 删除的查询参数
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

/// 重命名请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_name: String,
}

/// 新建目录请求体
#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
    pub name: String,
}

/// 变更操作结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationResult {
    pub success: bool,
}

/// 根据扩展名获取 MIME 类型
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// 校验单层名称（重命名、新建目录、上传文件名）
///
/// 不允许为空、包含路径分隔符或为 `.` / `..`
pub fn validate_leaf_name(name: &str) -> Result<&str, FsError> {
    if name.trim().is_empty() {
        return Err(FsError::bad_request("Name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(FsError::bad_request("Invalid name").with_path(name));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(FsError::bad_request("Name must not contain path separators").with_path(name));
    }
    Ok(name)
}
