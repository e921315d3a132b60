// 局域网文件共享服务核心库
//
// 在共享根目录上提供浏览、上传、下载、删除、重命名、新建目录，
// 并把每次访问写入按天分割的访问日志

// 配置管理模块
pub mod config;

// 诊断日志
pub mod logging;

// 共享目录沙箱与文件操作
pub mod filesystem;

// 🔥 访问日志（按天存储 + 实时推送）
pub mod access_log;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use access_log::{AccessLogStore, LogEntry, Operation};
pub use config::AppConfig;
pub use filesystem::{FilesystemService, PathGuard};
pub use server::{AppState, ServerError, ServerInfo, ServerManager};
