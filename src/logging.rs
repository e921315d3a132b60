//! 诊断日志
//!
//! 控制台 + 可选文件输出。文件以启动时间命名，超过大小上限时滚动到带序号的新文件，
//! 启动时清理超过保留天数的旧文件。
//!
//! 这里记录的是程序自身的运行日志，与共享目录的访问日志（`access_log`）无关。

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// 日志文件名前缀
const FILE_PREFIX: &str = "fileserve.";
const FILE_SUFFIX: &str = ".log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 按大小滚动的日志文件
///
/// 文件名：`fileserve.<启动时间>.log`，滚动后为 `fileserve.<启动时间>_<序号>.log`
struct RollingFile {
    log_dir: PathBuf,
    started_at: String,
    index: u32,
    max_size: u64,
    size: u64,
    file: File,
}

impl RollingFile {
    fn open(log_dir: PathBuf, max_size: u64) -> io::Result<Self> {
        let started_at = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        let file = open_append(&file_path(&log_dir, &started_at, 0))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            log_dir,
            started_at,
            index: 0,
            max_size,
            size,
            file,
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件总是接受写入，避免单条超大日志不停滚动
        if self.size > 0 && self.size + buf.len() as u64 > self.max_size {
            self.file.flush()?;
            self.index += 1;
            self.file = open_append(&file_path(&self.log_dir, &self.started_at, self.index))?;
            self.size = 0;
        }

        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }
}

fn file_path(log_dir: &Path, started_at: &str, index: u32) -> PathBuf {
    let name = if index == 0 {
        format!("{}{}{}", FILE_PREFIX, started_at, FILE_SUFFIX)
    } else {
        format!("{}{}_{}{}", FILE_PREFIX, started_at, index, FILE_SUFFIX)
    };
    log_dir.join(name)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// 可在线程间共享的文件写入器，交给 `tracing_appender::non_blocking` 使用
#[derive(Clone)]
pub struct LogFileWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl LogFileWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(log_dir, max_file_size)?)),
        })
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别；文件输出失败时回退到仅控制台
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);

    if !config.enabled {
        install(env_filter, console_layer, None);
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    let writer = fs::create_dir_all(&config.log_dir)
        .and_then(|_| LogFileWriter::new(config.log_dir.clone(), config.max_file_size));
    let writer = match writer {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "创建日志文件失败: {:?}, 错误: {}, 回退到仅控制台输出",
                config.log_dir, e
            );
            install(env_filter, console_layer, None);
            return LogGuard { _file_guard: None };
        }
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);
    install(env_filter, console_layer, Some(file_layer.boxed()));

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

fn install<L>(
    env_filter: EnvFilter,
    console_layer: L,
    file_layer: Option<Box<dyn Layer<Registry> + Send + Sync>>,
) where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let layers = match file_layer {
        Some(file_layer) => vec![console_layer.boxed(), file_layer],
        None => vec![console_layer.boxed()],
    };
    // 测试中可能重复初始化，忽略错误
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init();
}

/// 删除超过保留天数的日志文件，返回删除数量
///
/// 优先按文件名中的日期判断，无法解析时按修改时间判断
fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
            continue;
        }

        let expired = match date_from_file_name(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => expired_by_mtime(&entry, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    removed
}

/// `fileserve.2024-03-09-081500_2.log` -> 2024-03-09
fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let date = stem.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn expired_by_mtime(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .map(|modified| {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            chrono::Utc::now().signed_duration_since(modified) > retention
        })
        .unwrap_or(false)
}
