// Web服务器模块

pub mod error;
pub mod handlers;
pub mod manager;
pub mod router;
pub mod state;
pub mod websocket;

pub use error::{ApiError, ApiResult, TextError};
pub use manager::{discover_ipv4, ServerError, ServerInfo, ServerManager};
pub use router::build_router;
pub use state::AppState;
