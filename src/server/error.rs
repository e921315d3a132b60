// API 错误类型
//
// 所有处理器的失败都转换为带 error 字段的响应，不会影响监听循环

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::access_log::AccessLogError;
use crate::filesystem::{FsError, FsErrorCode};

pub type ApiResult<T> = Result<T, ApiError>;

/// API 错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    OutOfBounds(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    IoFailure(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfBounds(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::IoFailure(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::OutOfBounds(_) => "OutOfBounds",
            Self::BadRequest(_) => "BadRequest",
            Self::IoFailure(_) => "IOFailure",
            Self::Internal(_) => "Internal",
        }
    }

    /// 阻塞任务异常结束（panic 或被取消）
    pub fn from_join(err: tokio::task::JoinError) -> Self {
        tracing::error!("后台任务异常结束: {}", err);
        Self::Internal(format!("Task failed: {}", err))
    }
}

impl From<FsError> for ApiError {
    fn from(err: FsError) -> Self {
        let message = err.to_string();
        match err.code {
            FsErrorCode::NotFound => Self::NotFound(message),
            FsErrorCode::OutOfBounds => Self::OutOfBounds(message),
            FsErrorCode::BadRequest => Self::BadRequest(message),
            FsErrorCode::IoFailure => Self::IoFailure(message),
        }
    }
}

impl From<AccessLogError> for ApiError {
    fn from(err: AccessLogError) -> Self {
        match err {
            AccessLogError::InvalidDate(_) | AccessLogError::MalformedLine(_) => {
                Self::BadRequest(err.to_string())
            }
            AccessLogError::Io(_) => Self::IoFailure(err.to_string()),
        }
    }
}

/// 错误响应体
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_) | Self::IoFailure(_)) {
            tracing::error!("请求失败: {}", self);
        }
        let body = Json(ErrorBody {
            kind: self.kind(),
            error: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

/// 以纯文本返回的错误（下载、日志读取）
#[derive(Debug)]
pub struct TextError(pub ApiError);

impl From<ApiError> for TextError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<FsError> for TextError {
    fn from(err: FsError) -> Self {
        Self(err.into())
    }
}

impl From<AccessLogError> for TextError {
    fn from(err: AccessLogError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for TextError {
    fn into_response(self) -> Response {
        (self.0.status(), self.0.to_string()).into_response()
    }
}
