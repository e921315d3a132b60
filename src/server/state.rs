// 应用状态

use crate::access_log::{AccessLogStore, Operation};
use crate::config::AppConfig;
use crate::filesystem::FilesystemService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    /// 文件系统服务（共享根目录）
    pub fs: FilesystemService,
    /// 访问日志
    pub access_log: Arc<AccessLogStore>,
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 同时处理的请求数（流式响应体传输完毕才释放）
    pub request_slots: Arc<Semaphore>,
    /// 服务停止信号，升级后的 WebSocket 连接也监听它
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(config: Arc<AppConfig>, access_log: Arc<AccessLogStore>) -> anyhow::Result<Self> {
        let fs = FilesystemService::new(&config.filesystem)?;
        tracing::info!("共享根目录: {:?}", fs.guard().root());

        let request_slots = Arc::new(Semaphore::new(config.server.max_concurrent_requests.max(1)));

        Ok(Self {
            fs,
            access_log,
            config,
            request_slots,
            shutdown: CancellationToken::new(),
        })
    }

    /// 写入一条访问日志（在阻塞线程池中执行）
    pub async fn record(&self, addr: SocketAddr, operation: Operation, path: impl Into<String>) {
        let store = self.access_log.clone();
        let client_ip = addr.ip().to_string();
        let path = path.into();
        if let Err(e) =
            tokio::task::spawn_blocking(move || store.record(&client_ip, operation, &path)).await
        {
            tracing::warn!("写入访问日志任务失败: {}", e);
        }
    }
}
