// 本地文件系统模块
//
// 共享根目录下的目录浏览、文件传输与增删改操作

mod guard;
mod service;
mod transfer;
mod types;

pub use guard::PathGuard;
pub use service::{FilesystemService, Renamed};
pub use transfer::{open_download, Download, UploadSession, UploadSink};
pub use types::*;
