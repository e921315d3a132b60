// 文件浏览与传输 API 处理器

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Multipart, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::access_log::Operation;
use crate::filesystem::{open_download, ListResponse, PathQuery, UploadSession};
use crate::server::error::{ApiError, ApiResult, TextError};
use crate::server::AppState;

/// 上传响应
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
}

/// GET /api/list?path=/docs
/// 列出目录内容
pub async fn list_directory(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<ListResponse>> {
    let path = query.path.unwrap_or_else(|| "/".to_string());
    info!("API: 列目录 path={}", path);

    let fs = state.fs.clone();
    let list_path = path.clone();
    let response = tokio::task::spawn_blocking(move || fs.list_directory(&list_path))
        .await
        .map_err(ApiError::from_join)??;

    state.record(addr, Operation::List, path).await;
    Ok(Json(response))
}

/// GET /api/get?path=/docs/a.txt
/// 下载文件（流式传输）
pub async fn download_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<PathQuery>,
) -> Result<Response, TextError> {
    let path = query
        .path
        .ok_or_else(|| ApiError::BadRequest("Missing path parameter".to_string()))?;
    info!("API: 下载 path={}", path);

    let download = open_download(&state.fs, &path).await?;
    state.record(addr, Operation::Get, path).await;

    let disposition = format!(
        "inline; filename*=UTF-8''{}",
        urlencoding::encode(&download.file_name)
    );
    let mut response = Body::from_stream(ReaderStream::new(download.file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(download.mime));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.len));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// POST /api/upload (multipart: file..., path)
/// 上传文件到目标目录，同名文件直接覆盖
pub async fn upload_files(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<PathQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut session = UploadSession::new(state.fs.clone());

    let result = receive_upload(&mut session, query.path.as_deref(), &mut multipart).await;

    // 已写入的文件无论后续是否失败都要记日志
    for path in session.take_completed() {
        info!("上传完成: {}", path);
        state.record(addr, Operation::Upload, path).await;
    }

    result.map(|_| Json(UploadResponse { success: true }))
}

async fn receive_upload(
    session: &mut UploadSession,
    query_dir: Option<&str>,
    multipart: &mut Multipart,
) -> ApiResult<()> {
    if let Some(dir) = query_dir {
        session.set_target_dir(dir).await?;
    }

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("path") => {
                let dir = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid path field: {}", e)))?;
                session.set_target_dir(&dir).await?;
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let Some(mut sink) = session.begin_file(&file_name).await? else {
                    continue;
                };
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {}", e)))?
                {
                    sink.write(&chunk).await?;
                }
                info!("API: 上传 {} ({} 字节)", file_name, sink.written());
                session.finish_file(sink).await?;
            }
            _ => {}
        }
    }

    session.finish().await?;
    Ok(())
}
