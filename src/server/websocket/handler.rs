//! WebSocket 路由处理器
//!
//! 把访问日志实时推送给远程宿主（每条日志一个 JSON 消息）

use crate::server::websocket::message::{WsClientMessage, WsServerMessage};
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket 路由处理器
///
/// 升级 HTTP 连接为 WebSocket，处理消息收发
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 处理 WebSocket 连接
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("新的日志订阅连接: {}", connection_id);

    // 先订阅，避免握手期间漏掉日志
    let mut log_receiver = state.access_log.subscribe();
    let shutdown = state.shutdown.clone();
    let (mut sender, mut receiver) = socket.split();

    let connected_msg = WsServerMessage::connected(connection_id.clone());
    if let Ok(json) = serde_json::to_string(&connected_msg) {
        if sender.send(Message::Text(json)).await.is_err() {
            error!("发送连接成功消息失败");
            return;
        }
    }

    // 接收任务通过该通道回复 Pong
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsServerMessage>();

    // 启动发送任务
    let send_conn_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("服务停止，关闭日志订阅: {}", send_conn_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                received = log_receiver.recv() => match received {
                    Ok(entry) => WsServerMessage::log(entry),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("日志订阅处理过慢，丢弃 {} 条: {}", skipped, send_conn_id);
                        WsServerMessage::Lagged { skipped }
                    }
                    Err(RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("序列化消息失败: {}", e);
                }
            }
        }
    });

    // 启动接收任务
    let recv_conn_id = connection_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(reply) = handle_client_message(&text) {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => {
                    info!("收到关闭消息: {}", recv_conn_id);
                    break;
                }
                // Ping/Pong 由 axum 自动处理
                _ => {}
            }
        }
    });

    // 等待任一任务结束，另一个随之中止
    let mut send_task = send_task;
    let mut recv_task = recv_task;
    tokio::select! {
        _ = &mut send_task => {
            debug!("发送任务结束: {}", connection_id);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("接收任务结束: {}", connection_id);
            send_task.abort();
        }
    }

    info!("日志订阅连接已关闭: {}", connection_id);
}

/// 处理客户端消息，返回需要回复的消息
fn handle_client_message(text: &str) -> Option<WsServerMessage> {
    match serde_json::from_str::<WsClientMessage>(text) {
        Ok(WsClientMessage::Ping { timestamp }) => Some(WsServerMessage::pong(Some(timestamp))),
        Err(e) => {
            warn!("无法解析客户端消息: {}", e);
            Some(WsServerMessage::error("INVALID_MESSAGE", format!("无法解析消息: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_replies() {
        let reply = handle_client_message(r#"{"type":"ping","timestamp":7}"#);
        assert!(matches!(
            reply,
            Some(WsServerMessage::Pong {
                client_timestamp: Some(7),
                ..
            })
        ));

        let reply = handle_client_message("garbage");
        assert!(matches!(reply, Some(WsServerMessage::Error { .. })));
    }
}
