// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 文件系统配置
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    /// 访问日志配置
    #[serde(default)]
    pub access_log: AccessLogConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址（默认所有网卡）
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 同时处理的最大请求数（流式响应体传输完毕才释放名额）
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// 单个请求超时（秒），不设置表示不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// 上传请求体大小上限（字节），不设置表示不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_upload_size: Option<usize>,
    /// 停止服务时等待连接结束的时间（秒）
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_concurrent_requests() -> usize {
    64
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: None,
            max_upload_size: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// 文件系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// 共享根目录，所有访问都被限制在该目录之下
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// 是否显示隐藏文件
    #[serde(default = "default_show_hidden")]
    pub show_hidden: bool,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("shared")
}

fn default_show_hidden() -> bool {
    true
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            show_hidden: default_show_hidden(),
        }
    }
}

/// 访问日志配置（每天一个文件，只追加）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    /// 访问日志目录
    #[serde(default = "default_access_log_dir")]
    pub log_dir: PathBuf,
    /// 实时推送通道容量
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_access_log_dir() -> PathBuf {
    PathBuf::from("access_logs")
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            log_dir: default_access_log_dir(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        if config.server.max_concurrent_requests == 0 {
            anyhow::bail!("server.max_concurrent_requests 必须大于 0");
        }

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }

    /// 确保共享根目录存在
    pub fn ensure_root_dir(&self) -> Result<()> {
        let root = &self.filesystem.root_dir;
        if !root.exists() {
            std::fs::create_dir_all(root)
                .with_context(|| format!("无法创建共享根目录 {:?}", root))?;
            tracing::info!("✓ 已创建共享根目录: {:?}", root);
        } else if !root.is_dir() {
            anyhow::bail!("共享根目录不是目录: {:?}", root);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_concurrent_requests, 64);
        assert!(config.server.request_timeout_secs.is_none());
        assert!(config.filesystem.show_hidden);
        assert_eq!(config.access_log.log_dir, PathBuf::from("access_logs"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.server.port = 9090;
        config.server.request_timeout_secs = Some(30);
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.server.port, 9090);
        assert_eq!(loaded.server.request_timeout_secs, Some(30));
        assert_eq!(loaded.filesystem.root_dir, config.filesystem.root_dir);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 3000

            [filesystem]
            root_dir = "/sdcard"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.filesystem.root_dir, PathBuf::from("/sdcard"));
        assert!(config.filesystem.show_hidden);
        assert_eq!(config.log.level, "info");
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[server]\nmax_concurrent_requests = 0\n").unwrap();

        let result = AppConfig::load_from_file(temp_file.path().to_str().unwrap()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_ensure_root_dir_creates_missing() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.filesystem.root_dir = dir.path().join("a/b");

        config.ensure_root_dir().unwrap();
        assert!(config.filesystem.root_dir.is_dir());
    }
}
