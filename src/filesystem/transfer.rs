// 文件传输
//
// 下载以流的形式读取文件；上传按分片写入，目标目录未知时先写入临时文件

use std::path::PathBuf;

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::guard::PathGuard;
use super::service::FilesystemService;
use super::types::*;

/// 待下载的文件
#[derive(Debug)]
pub struct Download {
    pub file: File,
    pub len: u64,
    pub mime: &'static str,
    pub file_name: String,
}

/// 打开要下载的文件（不存在或为目录时返回 NotFound）
pub async fn open_download(service: &FilesystemService, path: &str) -> Result<Download, FsError> {
    let target = {
        let service = service.clone();
        let path = path.to_string();
        blocking(move || service.resolve_file(&path)).await?
    };
    let file = File::open(&target).await.map_err(|e| FsError::io(e, path))?;
    let len = file.metadata().await.map_err(|e| FsError::io(e, path))?.len();
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Download {
        file,
        len,
        mime: mime_for_path(&target),
        file_name,
    })
}

/// 已暂存、等待移动到目标目录的上传文件
#[derive(Debug)]
struct PendingUpload {
    file_name: String,
    spool: NamedTempFile,
}

/// 正在写入的单个上传文件
#[derive(Debug)]
pub struct UploadSink {
    file: File,
    written: u64,
    target: SinkTarget,
}

#[derive(Debug)]
enum SinkTarget {
    Direct { client_path: String },
    Spooled(PendingUpload),
}

impl UploadSink {
    /// 写入一个分片
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), FsError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| FsError::io(e, self.describe()))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn describe(&self) -> String {
        match &self.target {
            SinkTarget::Direct { client_path } => client_path.clone(),
            SinkTarget::Spooled(pending) => pending.file_name.clone(),
        }
    }
}

/// 一次 multipart 上传
///
/// 浏览器可能先发送文件再发送 `path` 字段，此时文件先暂存到临时目录，
/// 目标目录确定后再移动过去；之后的文件直接写入目标位置
pub struct UploadSession {
    service: FilesystemService,
    target_dir: Option<String>,
    pending: Vec<PendingUpload>,
    completed: Vec<String>,
}

impl UploadSession {
    pub fn new(service: FilesystemService) -> Self {
        Self {
            service,
            target_dir: None,
            pending: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// 设置目标目录（必须已存在），并移动已暂存的文件
    pub async fn set_target_dir(&mut self, dir: &str) -> Result<(), FsError> {
        let service = self.service.clone();
        let checked = dir.to_string();
        blocking(move || service.resolve_dir(&checked)).await?;
        self.target_dir = Some(dir.to_string());
        self.flush_pending().await
    }

    /// 开始写入一个文件，文件名为空时返回 None（跳过）
    pub async fn begin_file(&mut self, raw_name: &str) -> Result<Option<UploadSink>, FsError> {
        let Some(file_name) = leaf_of(raw_name) else {
            return Ok(None);
        };
        validate_leaf_name(file_name)?;

        match &self.target_dir {
            Some(dir) => {
                let client_path = PathGuard::join_client(dir, file_name);
                let destination = self.resolve_target(&client_path).await?;
                // 覆盖同名文件
                let file = File::create(&destination)
                    .await
                    .map_err(|e| FsError::io(e, client_path.clone()))?;
                Ok(Some(UploadSink {
                    file,
                    written: 0,
                    target: SinkTarget::Direct { client_path },
                }))
            }
            None => {
                let name = file_name.to_string();
                let (spool, handle) = blocking(move || {
                    let spool = NamedTempFile::new().map_err(|e| FsError::io(e, name.clone()))?;
                    let handle = spool.reopen().map_err(|e| FsError::io(e, name))?;
                    Ok((spool, handle))
                })
                .await?;
                Ok(Some(UploadSink {
                    file: File::from_std(handle),
                    written: 0,
                    target: SinkTarget::Spooled(PendingUpload {
                        file_name: file_name.to_string(),
                        spool,
                    }),
                }))
            }
        }
    }

    /// 完成一个文件的写入
    pub async fn finish_file(&mut self, mut sink: UploadSink) -> Result<(), FsError> {
        let described = sink.describe();
        sink.file
            .flush()
            .await
            .map_err(|e| FsError::io(e, described.clone()))?;
        sink.file
            .sync_all()
            .await
            .map_err(|e| FsError::io(e, described))?;

        match sink.target {
            SinkTarget::Direct { client_path } => self.completed.push(client_path),
            SinkTarget::Spooled(pending) => self.pending.push(pending),
        }
        Ok(())
    }

    /// 结束上传；未指定目录时使用根目录
    pub async fn finish(&mut self) -> Result<(), FsError> {
        if self.target_dir.is_none() {
            self.set_target_dir("/").await?;
        }
        self.flush_pending().await
    }

    /// 取出已写入完成的文件（客户端路径）
    pub fn take_completed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.completed)
    }

    async fn flush_pending(&mut self) -> Result<(), FsError> {
        let Some(dir) = self.target_dir.clone() else {
            return Ok(());
        };

        while let Some(pending) = self.pending.pop() {
            let client_path = PathGuard::join_client(&dir, &pending.file_name);
            let destination = self.resolve_target(&client_path).await?;
            let described = client_path.clone();
            blocking(move || {
                persist_spool(pending.spool, destination).map_err(|e| FsError::io(e, described))
            })
            .await?;

            self.completed.push(client_path);
        }
        Ok(())
    }

    async fn resolve_target(&self, client_path: &str) -> Result<PathBuf, FsError> {
        let service = self.service.clone();
        let client_path = client_path.to_string();
        blocking(move || service.guard().resolve(&client_path)).await
    }
}

/// 在阻塞线程池中执行文件系统调用
async fn blocking<T, F>(f: F) -> Result<T, FsError>
where
    F: FnOnce() -> Result<T, FsError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        FsError::new(FsErrorCode::IoFailure).with_message(format!("Blocking task failed: {}", e))
    })?
}

/// 把暂存文件移动到目标位置；跨文件系统时退回复制
fn persist_spool(spool: NamedTempFile, destination: PathBuf) -> std::io::Result<()> {
    match spool.persist(&destination) {
        Ok(_) => Ok(()),
        Err(e) => {
            std::fs::copy(e.file.path(), &destination)?;
            Ok(())
        }
    }
}

/// 取客户端文件名的最后一层（浏览器可能带上目录）
fn leaf_of(raw: &str) -> Option<&str> {
    let leaf = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(raw);
    if leaf.is_empty() {
        None
    } else {
        Some(leaf)
    }
}
