//! Axum Router 集成
//!
//! 提供信令 WebSocket 端点的 Router，由主 HTTP 服务挂载

use crate::gateway::Gateway;
use crate::server::handle_websocket_connection;
use axum::{
    Router,
    extract::{ConnectInfo, Query, State, ws::WebSocketUpgrade},
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::info;

/// 握手查询参数
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    pub token: Option<String>,
}

/// 创建信令 Router
///
/// 需要以 `into_make_service_with_connect_info::<SocketAddr>()` 方式启动。
pub fn create_signaling_router(gateway: Gateway, ws_path: &str) -> Router {
    info!("Creating signaling router at {}", ws_path);

    Router::new()
        .route(ws_path, get(websocket_handler))
        .with_state(gateway)
}

/// WebSocket 升级处理器
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Gateway>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = extract_token(&headers, params.token);
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, gateway, token, Some(addr)))
}

/// `Authorization: Bearer` 头优先，其次是 `?token=`
pub fn extract_token(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty());

    from_header
        .map(str::to_string)
        .or_else(|| query_token.filter(|token| !token.trim().is_empty()))
}
