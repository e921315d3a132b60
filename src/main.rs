use anyhow::Context;
use fileserve_rust::{config::DEFAULT_CONFIG_PATH, logging, AppConfig, ServerManager};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（不存在时写入默认配置）
    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;

    // 初始化日志系统（必须保持 guard 存活）
    let _log_guard = logging::init_logging(&config.log);

    config.ensure_root_dir().context("创建共享根目录失败")?;
    info!("共享根目录: {:?}", config.filesystem.root_dir);
    info!("访问日志目录: {:?}", config.access_log.log_dir);

    let port = config.server.port;
    let manager = ServerManager::new(config)?;

    // 🔥 访问日志实时输出到控制台
    let mut log_receiver = manager.subscribe_logs();
    tokio::spawn(async move {
        loop {
            match log_receiver.recv().await {
                Ok(entry) => info!(target: "access", "{}", entry.to_line()),
                Err(RecvError::Lagged(skipped)) => warn!("访问日志输出过慢，跳过 {} 条", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let server_info = manager.start(port).await?;
    info!("服务器启动在: {}", server_info.url);
    info!("API 基础路径: {}/api", server_info.url);
    info!("实时访问日志: ws://{}:{}/api/logs/ws", server_info.ip, server_info.port);
    info!("健康检查: {}/health", server_info.url);

    tokio::signal::ctrl_c().await.context("监听 Ctrl+C 失败")?;
    info!("收到 Ctrl+C，开始优雅关闭...");

    manager.stop().await;
    info!("应用已安全退出");

    Ok(())
}
