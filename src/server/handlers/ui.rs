// 内置页面、健康检查与兜底路由

use axum::{http::StatusCode, response::Html, Json};
use serde::Serialize;

/// 内置单页界面
const INDEX_HTML: &str = include_str!("../../../assets/index.html");

/// GET / 与 /index.html
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// 健康检查响应结构
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
    })
}

/// 未匹配的路由
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
