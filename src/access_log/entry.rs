// 访问日志条目

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::AccessLogError;

/// 日志行字段分隔符
const SEPARATOR: &str = " | ";

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    List,
    Get,
    Upload,
    Delete,
    Rename,
    Mkdir,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Get => "GET",
            Self::Upload => "UPLOAD",
            Self::Delete => "DELETE",
            Self::Rename => "RENAME",
            Self::Mkdir => "MKDIR",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = AccessLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIST" => Ok(Self::List),
            "GET" => Ok(Self::Get),
            "UPLOAD" => Ok(Self::Upload),
            "DELETE" => Ok(Self::Delete),
            "RENAME" => Ok(Self::Rename),
            "MKDIR" => Ok(Self::Mkdir),
            other => Err(AccessLogError::MalformedLine(format!("unknown operation {}", other))),
        }
    }
}

/// 一条访问日志，写入后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// 本地时间，精确到秒
    pub timestamp: NaiveDateTime,
    pub client_ip: String,
    pub operation: Operation,
    pub path: String,
}

impl LogEntry {
    /// 以当前本地时间创建日志条目
    pub fn now(client_ip: impl Into<String>, operation: Operation, path: impl Into<String>) -> Self {
        let now = Local::now().naive_local();
        Self::at(now, client_ip, operation, path)
    }

    /// 以指定时间创建日志条目（秒以下被截断）
    pub fn at(
        timestamp: NaiveDateTime,
        client_ip: impl Into<String>,
        operation: Operation,
        path: impl Into<String>,
    ) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        // 换行会破坏一行一条的格式
        let path = path.into().replace(['\r', '\n'], " ");
        Self {
            timestamp,
            client_ip: client_ip.into(),
            operation,
            path,
        }
    }

    /// 所属日期键（YYYYMMDD）
    pub fn day_key(&self) -> String {
        day_key(self.timestamp.date())
    }

    /// 序列化为日志行（不含换行）：`HH:MM:SS | ip | OPERATION | path`
    pub fn to_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.timestamp.format("%H:%M:%S"),
            self.client_ip,
            self.operation,
            self.path,
            sep = SEPARATOR
        )
    }

    /// 解析日志行，日期取自文件的日期键
    pub fn parse_line(day: &str, line: &str) -> Result<Self, AccessLogError> {
        let date = parse_day_key(day)?;
        let malformed = || AccessLogError::MalformedLine(line.to_string());

        // 路径在最后一列，允许包含分隔符
        let mut parts = line.trim_end_matches(['\r', '\n']).splitn(4, SEPARATOR);
        let time = parts.next().ok_or_else(malformed)?;
        let client_ip = parts.next().ok_or_else(malformed)?;
        let operation = parts.next().ok_or_else(malformed)?;
        let path = parts.next().ok_or_else(malformed)?;

        let time = NaiveTime::parse_from_str(time, "%H:%M:%S").map_err(|_| malformed())?;

        Ok(Self {
            timestamp: date.and_time(time),
            client_ip: client_ip.to_string(),
            operation: operation.parse()?,
            path: path.to_string(),
        })
    }
}

/// 日期转日期键
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// 校验并解析日期键（8 位数字）
pub fn parse_day_key(day: &str) -> Result<NaiveDate, AccessLogError> {
    if day.len() != 8 || !day.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AccessLogError::InvalidDate(day.to_string()));
    }
    NaiveDate::parse_from_str(day, "%Y%m%d").map_err(|_| AccessLogError::InvalidDate(day.to_string()))
}
