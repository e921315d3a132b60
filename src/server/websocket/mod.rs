//! WebSocket 模块
//!
//! 提供访问日志实时推送功能

mod handler;
mod message;

pub use handler::handle_websocket;
pub use message::{WsClientMessage, WsServerMessage};
