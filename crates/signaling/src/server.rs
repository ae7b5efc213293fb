//! WebSocket 信令连接处理
//!
//! 每个连接拆成读写两个任务：
//! - 读任务解析文本帧并交给 [`SignalingRelay`](crate::relay::SignalingRelay)，同一连接的消息严格按收到顺序处理
//! - 写任务从出站队列取帧写回 socket，收到 [`Outbound::Close`] 时发送关闭帧后退出
//!
//! 任一任务结束后另一个被中止，然后执行下线清理。

use crate::gateway::Gateway;
use crate::hub::{CLOSE_UNAUTHORIZED, Outbound};
use crate::protocol::ClientMessage;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use callrelay_common::metrics::{INVALID_MESSAGES, SIGNALING_MESSAGES, WEBSOCKET_CONNECTIONS};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// 处理一个已升级的 WebSocket 连接，直到连接关闭
pub async fn handle_websocket_connection(
    mut websocket: WebSocket,
    gateway: Gateway,
    token: Option<String>,
    client_addr: Option<SocketAddr>,
) {
    let connection_id = Uuid::new_v4().to_string();
    info!(
        "New WebSocket connection {} (peer: {:?})",
        connection_id, client_addr
    );

    WEBSOCKET_CONNECTIONS.inc();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Outbound>();

    let identity = match gateway
        .lifecycle()
        .connect(&connection_id, token.as_deref(), outbox)
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            let frame = CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: format!("unauthorized: {}", e.reason()).into(),
            };
            if let Err(e) = websocket.send(WsMessage::Close(Some(frame))).await {
                debug!("Failed to send close frame to {}: {}", connection_id, e);
            }
            WEBSOCKET_CONNECTIONS.dec();
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = websocket.split();

    let receive_gateway = gateway.clone();
    let receive_connection_id = connection_id.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    handle_text_frame(&receive_gateway, &receive_connection_id, text.as_str());
                }
                Ok(WsMessage::Close(_)) => {
                    debug!("Connection {} closed by client", receive_connection_id);
                    break;
                }
                Ok(WsMessage::Binary(_)) => {
                    debug!("Ignoring binary frame from {}", receive_connection_id);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on {}: {}", receive_connection_id, e);
                    break;
                }
            }
        }
    });

    let send_connection_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = outbox_rx.recv().await {
            let frame = match outbound {
                Outbound::Message(message) => match serde_json::to_string(&message) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(e) => {
                        error!("Failed to encode {}: {}", message.event_name(), e);
                        continue;
                    }
                },
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_sender.send(WsMessage::Close(Some(frame))).await;
                    debug!("Closed connection {} with code {}", send_connection_id, code);
                    break;
                }
            };

            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => receive_task.abort(),
    }

    gateway.disconnect(&connection_id).await;
    WEBSOCKET_CONNECTIONS.dec();
    info!("Connection {} of {} closed", connection_id, identity);
}

fn handle_text_frame(gateway: &Gateway, connection_id: &str, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            INVALID_MESSAGES.with_label_values(&[e.reason()]).inc();
            warn!("Dropping invalid frame from {}: {}", connection_id, e);
            return;
        }
    };

    let event = message.event_name();
    SIGNALING_MESSAGES.with_label_values(&[event]).inc();

    let span = info_span!("signaling.handle_message", conn_id = %connection_id, event);
    span.in_scope(|| gateway.relay().handle(connection_id, message));
}
