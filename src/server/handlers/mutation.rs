// 文件变更 API 处理器（删除、重命名、新建目录）

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::access_log::Operation;
use crate::filesystem::{MkdirRequest, MutationResult, PathQuery, RenameRequest};
use crate::server::error::{ApiError, ApiResult};
use crate::server::AppState;

/// 解析 JSON 请求体，格式错误统一返回 BadRequest
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))
}

/// DELETE /api/delete?path=/docs/a.txt
/// 递归删除文件或目录
pub async fn delete_entry(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<MutationResult>> {
    let path = query
        .path
        .ok_or_else(|| ApiError::BadRequest("Missing path parameter".to_string()))?;
    info!("API: 删除 path={}", path);

    let fs = state.fs.clone();
    let target = path.clone();
    let success = tokio::task::spawn_blocking(move || fs.delete(&target))
        .await
        .map_err(ApiError::from_join)??;

    // 部分失败也记日志
    state.record(addr, Operation::Delete, path).await;
    Ok(Json(MutationResult { success }))
}

/// POST /api/rename {"oldPath": "/docs/a.txt", "newName": "b.txt"}
pub async fn rename_entry(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> ApiResult<Json<MutationResult>> {
    let req: RenameRequest = parse_json(&body)?;
    info!("API: 重命名 {} -> {}", req.old_path, req.new_name);

    let fs = state.fs.clone();
    let renamed = tokio::task::spawn_blocking(move || fs.rename(&req.old_path, &req.new_name))
        .await
        .map_err(ApiError::from_join)??;

    let success = match renamed {
        Some(renamed) => {
            state
                .record(
                    addr,
                    Operation::Rename,
                    format!("{} -> {}", renamed.old_path, renamed.new_path),
                )
                .await;
            true
        }
        None => false,
    };
    Ok(Json(MutationResult { success }))
}

/// POST /api/mkdir {"path": "/docs", "name": "sub"}
pub async fn make_directory(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> ApiResult<Json<MutationResult>> {
    let req: MkdirRequest = parse_json(&body)?;
    info!("API: 新建目录 {} / {}", req.path, req.name);

    let fs = state.fs.clone();
    let created = tokio::task::spawn_blocking(move || fs.mkdir(&req.path, &req.name))
        .await
        .map_err(ApiError::from_join)??;

    let success = created.is_some();
    if let Some(path) = created {
        state.record(addr, Operation::Mkdir, path).await;
    }
    Ok(Json(MutationResult { success }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_errors_are_bad_request() {
        let err = parse_json::<RenameRequest>(b"not json").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = parse_json::<MkdirRequest>(br#"{"path": "/"}"#).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let req: RenameRequest = parse_json(br#"{"oldPath": "/a", "newName": "b"}"#).unwrap();
        assert_eq!(req.old_path, "/a");
        assert_eq!(req.new_name, "b");
    }
}
