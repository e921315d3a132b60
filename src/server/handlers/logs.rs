// 访问日志查询 API 处理器

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::access_log::AccessLogStore;
use crate::server::error::{ApiError, ApiResult, TextError};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    /// 日期键 YYYYMMDD，默认今天
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogDatesResponse {
    pub dates: Vec<String>,
}

/// GET /api/logs?date=20240309
/// 返回某天的原始日志文本
pub async fn read_log(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<String, TextError> {
    let day = query.date.unwrap_or_else(AccessLogStore::today);
    let store = state.access_log.clone();
    let content = tokio::task::spawn_blocking(move || store.read_log(&day))
        .await
        .map_err(ApiError::from_join)??;
    Ok(content)
}

/// GET /api/logs/dates
pub async fn list_log_dates(State(state): State<AppState>) -> ApiResult<Json<LogDatesResponse>> {
    let store = state.access_log.clone();
    let dates = tokio::task::spawn_blocking(move || store.list_dates())
        .await
        .map_err(ApiError::from_join)??;
    Ok(Json(LogDatesResponse { dates }))
}
