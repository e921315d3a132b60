// 服务生命周期管理
//
// 状态只有 Stopped 与 Running，启动过程在锁内完成

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sysinfo::Networks;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::access_log::{AccessLogError, AccessLogStore, LogEntry};
use crate::config::AppConfig;
use crate::server::{build_router, AppState};

/// 服务运行信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// 对外展示的局域网 IPv4 地址
    pub ip: String,
    /// 实际监听端口
    pub port: u16,
    pub url: String,
}

/// 生命周期错误
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("服务已在端口 {port} 运行")]
    AlreadyRunning { port: u16 },

    #[error("服务未运行")]
    NotRunning,

    #[error("绑定 {addr} 失败: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("初始化失败: {0}")]
    Setup(String),
}

struct RunningServer {
    info: ServerInfo,
    /// 同时通知 HTTP 服务与已升级的 WebSocket 连接
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// 服务管理器
///
/// 负责启动、停止 HTTP 服务，并向宿主提供访问日志
pub struct ServerManager {
    config: Arc<AppConfig>,
    access_log: Arc<AccessLogStore>,
    running: Mutex<Option<RunningServer>>,
}

impl ServerManager {
    /// 创建服务管理器（不会启动服务）
    pub fn new(config: AppConfig) -> Result<Self, ServerError> {
        let access_log = AccessLogStore::new(&config.access_log)
            .map_err(|e| ServerError::Setup(format!("访问日志目录不可用: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            access_log: Arc::new(access_log),
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 启动服务
    ///
    /// 已运行时返回 AlreadyRunning，原有实例不受影响；端口为 0 时返回系统分配的端口
    pub async fn start(&self, port: u16) -> Result<ServerInfo, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            if !server.handle.is_finished() {
                return Err(ServerError::AlreadyRunning {
                    port: server.info.port,
                });
            }
            warn!("上一次运行的服务已意外退出");
        }

        self.config
            .ensure_root_dir()
            .map_err(|e| ServerError::Setup(e.to_string()))?;
        let state = AppState::new(self.config.clone(), self.access_log.clone())
            .map_err(|e| ServerError::Setup(e.to_string()))?;

        let addr = format!("{}:{}", self.config.server.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let bound_port = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?
            .port();

        let ip = discover_ipv4();
        let info = ServerInfo {
            ip: ip.to_string(),
            port: bound_port,
            url: format!("http://{}:{}", ip, bound_port),
        };

        let shutdown = state.shutdown.clone();
        let signal = shutdown.clone();
        let app = build_router(state);
        let handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

            if let Err(e) = result {
                error!("服务器错误: {}", e);
            }
        });

        info!("服务器启动在: {} (监听 {})", info.url, addr);
        *running = Some(RunningServer {
            info: info.clone(),
            shutdown,
            handle,
        });
        Ok(info)
    }

    /// 停止服务；未运行时什么也不做
    ///
    /// 先通知优雅关闭，超过宽限时间仍未结束则强制中止
    pub async fn stop(&self) {
        let Some(server) = self.running.lock().await.take() else {
            return;
        };

        info!("正在停止服务器: {}", server.info.url);
        server.shutdown.cancel();

        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        let mut handle = server.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("等待连接关闭超时（{:?}），强制中止", grace);
            handle.abort();
        }
        info!("服务器已停止");
    }

    /// 服务是否在运行
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|server| !server.handle.is_finished())
            .unwrap_or(false)
    }

    /// 当前运行信息
    pub async fn info(&self) -> Result<ServerInfo, ServerError> {
        match self.running.lock().await.as_ref() {
            Some(server) if !server.handle.is_finished() => Ok(server.info.clone()),
            _ => Err(ServerError::NotRunning),
        }
    }

    /// 已有访问日志的日期，最近的在前
    pub fn list_log_dates(&self) -> Result<Vec<String>, AccessLogError> {
        self.access_log.list_dates()
    }

    /// 读取某天的原始访问日志
    pub fn read_log(&self, day: &str) -> Result<String, AccessLogError> {
        self.access_log.read_log(day)
    }

    /// 订阅实时访问日志
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.access_log.subscribe()
    }
}

/// 查找可对外展示的 IPv4 地址
///
/// 按网卡名称顺序取第一个非回环 IPv4，找不到时返回 0.0.0.0
pub fn discover_ipv4() -> Ipv4Addr {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<_> = networks.list().iter().collect();
    interfaces.sort_by(|a, b| a.0.cmp(b.0));

    interfaces
        .into_iter()
        .flat_map(|(_, data)| data.ip_networks().iter())
        .find_map(|network| match network.addr {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::UNSPECIFIED)
}
