//! 访问日志
//!
//! 每个请求记录一行到当天的日志文件（`YYYYMMDD.log`，只追加），
//! 写入成功后广播给实时订阅者（宿主界面、WebSocket 客户端）

mod entry;

pub use entry::{day_key, parse_day_key, LogEntry, Operation};

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::AccessLogConfig;

/// 日志文件扩展名
const LOG_EXTENSION: &str = "log";

/// 访问日志错误
#[derive(Debug, thiserror::Error)]
pub enum AccessLogError {
    #[error("invalid log date: {0}")]
    InvalidDate(String),

    #[error("malformed log line: {0}")]
    MalformedLine(String),

    #[error("access log I/O error: {0}")]
    Io(#[from] io::Error),
}

/// 当天打开的日志文件
struct DayFile {
    day: String,
    file: File,
}

/// 访问日志存储
///
/// 所有追加都经过同一把锁，保证行与行之间不会交错
pub struct AccessLogStore {
    log_dir: PathBuf,
    writer: Mutex<Option<DayFile>>,
    sender: broadcast::Sender<LogEntry>,
}

impl AccessLogStore {
    /// 创建访问日志存储，日志目录不存在时自动创建
    pub fn new(config: &AccessLogConfig) -> Result<Self, AccessLogError> {
        fs::create_dir_all(&config.log_dir)?;
        let (sender, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Ok(Self {
            log_dir: config.log_dir.clone(),
            writer: Mutex::new(None),
            sender,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// 记录一次操作；写入失败只打日志，不影响请求
    pub fn record(&self, client_ip: &str, operation: Operation, path: &str) {
        let entry = LogEntry::now(client_ip, operation, path);
        if let Err(e) = self.append(&entry) {
            warn!("写入访问日志失败: {} ({})", e, entry.to_line());
        }
    }

    /// 追加一条日志并广播
    pub fn append(&self, entry: &LogEntry) -> Result<(), AccessLogError> {
        let day = entry.day_key();
        let mut line = entry.to_line();
        line.push('\n');

        {
            let mut writer = self.writer.lock();
            let needs_open = writer.as_ref().map(|w| w.day != day).unwrap_or(true);
            if needs_open {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.file_path(&day))?;
                *writer = Some(DayFile { day: day.clone(), file });
            }
            if let Some(day_file) = writer.as_mut() {
                day_file.file.write_all(line.as_bytes())?;
                day_file.file.flush()?;
            }
        }

        // 没有订阅者时 send 返回错误，忽略即可
        if self.sender.send(entry.clone()).is_err() {
            debug!("访问日志无订阅者");
        }
        Ok(())
    }

    /// 订阅实时日志
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// 列出已有日志的日期键，最近的在前
    pub fn list_dates(&self) -> Result<Vec<String>, AccessLogError> {
        let mut dates: Vec<String> = fs::read_dir(&self.log_dir)?
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let day = name.strip_suffix(&format!(".{}", LOG_EXTENSION))?.to_string();
                parse_day_key(&day).ok().map(|_| day)
            })
            .collect();

        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    /// 读取某天的原始日志内容，文件不存在时返回空字符串
    pub fn read_log(&self, day: &str) -> Result<String, AccessLogError> {
        parse_day_key(day)?;
        match fs::read(self.file_path(day)) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// 今天的日期键
    pub fn today() -> String {
        day_key(Local::now().date_naive())
    }

    fn file_path(&self, day: &str) -> PathBuf {
        self.log_dir.join(format!("{}.{}", day, LOG_EXTENSION))
    }
}
