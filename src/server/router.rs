// 路由与中间件

use std::any::Any;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use futures::StreamExt;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as CorsAny, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::server::error::ApiError;
use crate::server::{handlers, websocket, AppState};

/// 构建完整应用路由
pub fn build_router(state: AppState) -> Router {
    let server = &state.config.server;

    // 上传不受 axum 默认 2MB 请求体限制
    let upload_limit = match server.max_upload_size {
        Some(max) => DefaultBodyLimit::max(max),
        None => DefaultBodyLimit::disable(),
    };

    let common_layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(
            CorsLayer::new()
                .allow_origin(CorsAny)
                .allow_methods(CorsAny)
                .allow_headers(CorsAny),
        )
        .layer(CatchPanicLayer::custom(handle_panic));

    let mut router = Router::new()
        .route("/", get(handlers::index))
        .route("/index.html", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/api/list", get(handlers::list_directory))
        .route("/api/get", get(handlers::download_file))
        .route("/api/upload", post(handlers::upload_files).layer(upload_limit))
        .route("/api/delete", delete(handlers::delete_entry))
        .route("/api/rename", post(handlers::rename_entry))
        .route("/api/mkdir", post(handlers::make_directory))
        // 🔥 访问日志
        .route("/api/logs", get(handlers::read_log))
        .route("/api/logs/dates", get(handlers::list_log_dates))
        .route("/api/logs/ws", get(websocket::handle_websocket))
        .fallback(handlers::not_found)
        .with_state(state.clone());

    if let Some(secs) = server.request_timeout_secs {
        info!("请求超时: {} 秒", secs);
        router = router.layer(TimeoutLayer::new(Duration::from_secs(secs)));
    }

    router
        .layer(middleware::from_fn_with_state(state, limit_concurrency))
        .layer(common_layers)
}

/// 全局并发限制
///
/// 许可随响应体一起释放，流式下载在传输完成前一直占用名额
async fn limit_concurrency(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let permit = match state.request_slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return ApiError::Internal("Server is shutting down".to_string()).into_response(),
    };

    let response = next.run(req).await;
    // 已完整缓冲的响应体直接返回，许可在此释放
    if response.body().size_hint().exact().is_some() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &permit;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

/// 处理器 panic 时返回 500，监听循环不受影响
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("处理请求时发生 panic: {}", detail);
    ApiError::Internal(format!("Internal server error: {}", detail)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::{AccessLogStore, Operation};
    use crate::config::AppConfig;
    use axum::{
        body::{to_bytes, Body},
        extract::connect_info::MockConnectInfo,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::Value;
    use std::fs;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XBOUNDARYX";

    struct TestEnv {
        _dir: TempDir,
        root: PathBuf,
        state: AppState,
        app: Router,
    }

    fn setup() -> TestEnv {
        setup_with(|_| {})
    }

    fn setup_with(configure: impl FnOnce(&mut AppConfig)) -> TestEnv {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("shared");
        fs::create_dir_all(root.join("docs")).unwrap();

        let mut config = AppConfig::default();
        config.filesystem.root_dir = root.clone();
        config.access_log.log_dir = dir.path().join("access_logs");
        configure(&mut config);

        let access_log = Arc::new(AccessLogStore::new(&config.access_log).unwrap());
        let state = AppState::new(Arc::new(config), access_log).unwrap();
        let app = build_router(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 2], 5000))));

        TestEnv {
            _dir: dir,
            root,
            state,
            app,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_req(dir: Option<&str>, files: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, content) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(dir) = dir {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\n{dir}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn today_log(env: &TestEnv) -> String {
        env.state
            .access_log
            .read_log(&AccessLogStore::today())
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let env = setup();
        // path 字段在文件之后
        let (status, body) =
            send_json(&env.app, upload_req(Some("/docs"), &[("a.txt", b"hello")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let response = env
            .app
            .clone()
            .oneshot(get_req("/api/get?path=/docs/a.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(disposition, "inline; filename*=UTF-8''a.txt");
        let content = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&content[..], b"hello");

        let log = today_log(&env);
        assert!(log.contains("| 10.0.0.2 | UPLOAD | /docs/a.txt\n"));
        assert!(log.contains("| 10.0.0.2 | GET | /docs/a.txt\n"));
    }

    #[tokio::test]
    async fn test_upload_defaults_to_root_and_overwrites() {
        let env = setup();
        fs::write(env.root.join("b.bin"), "old").unwrap();

        let (status, _) = send_json(
            &env.app,
            upload_req(None, &[("b.bin", b"new"), ("c.bin", b"ccc")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fs::read_to_string(env.root.join("b.bin")).unwrap(), "new");
        assert_eq!(fs::read_to_string(env.root.join("c.bin")).unwrap(), "ccc");
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let env = setup();
        let (status, body) =
            send_json(&env.app, upload_req(Some("/missing"), &[("a.txt", b"x")])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NotFound");

        let (status, _) =
            send_json(&env.app, upload_req(Some("/docs"), &[("..", b"x")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // 没有文件也算成功
        let (status, body) = send_json(&env.app, upload_req(Some("/docs"), &[])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_list_order_and_entries() {
        let env = setup();
        fs::write(env.root.join("b.txt"), "bb").unwrap();
        fs::create_dir(env.root.join("Zdir")).unwrap();
        fs::write(env.root.join("a.txt"), "a").unwrap();

        let (status, body) = send_json(&env.app, get_req("/api/list")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["path"], "/");
        let names: Vec<&str> = body["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Zdir", "docs", "a.txt", "b.txt"]);

        let b = &body["files"][3];
        assert_eq!(b["path"], "/b.txt");
        assert_eq!(b["isDirectory"], false);
        assert_eq!(b["size"], 2);
        assert!(b["modified"].as_i64().unwrap() > 0);

        assert!(today_log(&env).contains("| LIST | /\n"));
    }

    #[tokio::test]
    async fn test_traversal_is_forbidden() {
        let env = setup();
        let (status, body) = send_json(&env.app, get_req("/api/list?path=/../..")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "OutOfBounds");

        let (status, body) = send(&env.app, get_req("/api/get?path=../../etc/passwd")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.is_empty());
        assert!(serde_json::from_slice::<Value>(&body).is_err());

        let (status, _) = send_json(
            &env.app,
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/delete?path=/../x")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_get_errors_are_plaintext() {
        let env = setup();
        let (status, body) = send(&env.app, get_req("/api/get")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(String::from_utf8(body).unwrap(), "Missing path parameter");

        let (status, _) = send(&env.app, get_req("/api/get?path=/nope.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&env.app, get_req("/api/get?path=/docs")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete() {
        let env = setup();
        fs::write(env.root.join("docs/a.txt"), "a").unwrap();
        fs::create_dir_all(env.root.join("docs/deep/er")).unwrap();
        fs::write(env.root.join("docs/deep/er/x"), "x").unwrap();

        let delete_req = |path: &str| {
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/delete?path={}", path))
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send_json(&env.app, delete_req("/docs/a.txt")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(!env.root.join("docs/a.txt").exists());

        let (_, body) = send_json(&env.app, delete_req("/docs/deep")).await;
        assert_eq!(body["success"], true);
        assert!(!env.root.join("docs/deep").exists());

        let (status, _) = send_json(&env.app, delete_req("/docs/a.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&env.app, delete_req("/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(env.root.exists());

        assert!(today_log(&env).contains("| DELETE | /docs/deep\n"));
    }

    #[tokio::test]
    async fn test_rename() {
        let env = setup();
        fs::write(env.root.join("docs/a.txt"), "content").unwrap();

        let (status, body) = send_json(
            &env.app,
            json_req(
                Method::POST,
                "/api/rename",
                serde_json::json!({"oldPath": "/docs/a.txt", "newName": "b.txt"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(!env.root.join("docs/a.txt").exists());
        assert_eq!(
            fs::read_to_string(env.root.join("docs/b.txt")).unwrap(),
            "content"
        );
        assert!(today_log(&env).contains("| RENAME | /docs/a.txt -> /docs/b.txt\n"));

        let (status, _) = send_json(
            &env.app,
            json_req(
                Method::POST,
                "/api/rename",
                serde_json::json!({"oldPath": "/docs/a.txt", "newName": "c.txt"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(
            &env.app,
            json_req(
                Method::POST,
                "/api/rename",
                serde_json::json!({"oldPath": "/docs/b.txt", "newName": "../escape"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/rename")
            .body(Body::from("{oops"))
            .unwrap();
        let (status, body) = send_json(&env.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "BadRequest");
    }

    #[tokio::test]
    async fn test_mkdir_twice() {
        let env = setup();
        let req = || {
            json_req(
                Method::POST,
                "/api/mkdir",
                serde_json::json!({"path": "/docs", "name": "sub"}),
            )
        };

        let (status, body) = send_json(&env.app, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send_json(&env.app, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(env.root.join("docs/sub").is_dir());

        let log = today_log(&env);
        assert_eq!(log.matches("| MKDIR | /docs/sub\n").count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_and_static_pages() {
        let env = setup();
        let (status, body) = send(&env.app, get_req("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"Not Found");

        let (status, body) = send(&env.app, get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("<html"));

        let (status, _) = send(&env.app, get_req("/index.html")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send_json(&env.app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_logs_endpoints_and_live_feed() {
        let env = setup();
        let mut receiver = env.state.access_log.subscribe();

        send(&env.app, get_req("/api/list?path=/docs")).await;
        let entry = receiver.recv().await.unwrap();
        assert_eq!(entry.operation, Operation::List);
        assert_eq!(entry.client_ip, "10.0.0.2");
        assert_eq!(entry.path, "/docs");

        let (status, body) = send(&env.app, get_req("/api/logs")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().ends_with("| 10.0.0.2 | LIST | /docs\n"));

        let (status, body) = send_json(&env.app, get_req("/api/logs/dates")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dates"][0], AccessLogStore::today());

        let (status, body) = send(&env.app, get_req("/api/logs?date=19990101")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (status, _) = send(&env.app, get_req("/api/logs?date=../../x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_failed_rename_is_not_logged() {
        let env = setup();
        fs::create_dir_all(env.root.join("docs/a")).unwrap();
        fs::create_dir_all(env.root.join("docs/b")).unwrap();
        fs::write(env.root.join("docs/b/keep.txt"), "k").unwrap();

        let (status, body) = send_json(
            &env.app,
            json_req(
                Method::POST,
                "/api/rename",
                serde_json::json!({"oldPath": "/docs/a", "newName": "b"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(env.root.join("docs/a").is_dir());
        assert!(!today_log(&env).contains("| RENAME |"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_partial_delete_still_logged() {
        use std::os::unix::fs::PermissionsExt;

        let env = setup();
        let locked = env.root.join("docs/locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("inner.txt"), "i").unwrap();
        fs::write(env.root.join("docs/a.txt"), "a").unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // root 用户不受目录权限限制，无法构造失败
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/delete?path=/docs")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&env.app, request).await;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(!env.root.join("docs/a.txt").exists());
        assert!(today_log(&env).contains("| 10.0.0.2 | DELETE | /docs\n"));
    }

    #[tokio::test]
    async fn test_streaming_download_holds_request_slot() {
        let env = setup_with(|config| config.server.max_concurrent_requests = 1);
        fs::write(env.root.join("docs/big.bin"), vec![7u8; 256 * 1024]).unwrap();

        let download = env
            .app
            .clone()
            .oneshot(get_req("/api/get?path=/docs/big.bin"))
            .await
            .unwrap();
        assert_eq!(download.status(), StatusCode::OK);

        // 下载尚未传输完，唯一的名额仍被占用
        let waiting = tokio::time::timeout(
            Duration::from_millis(200),
            env.app.clone().oneshot(get_req("/health")),
        )
        .await;
        assert!(waiting.is_err());

        let content = to_bytes(download.into_body(), usize::MAX).await.unwrap();
        assert_eq!(content.len(), 256 * 1024);

        let (status, _) = send(&env.app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_panic_response() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
