//! 连接出站队列表
//!
//! 每个 WebSocket 连接注册一个无界发送端，写任务从对应接收端取帧写出。
//! 中继逻辑只和这里打交道，不直接持有 socket。

use crate::protocol::ServerMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 关闭码：同一用户在别处重新连接
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// 关闭码：认证失败
pub const CLOSE_UNAUTHORIZED: u16 = 4401;

/// 写任务处理的出站帧
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close { code: u16, reason: String },
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

#[derive(Debug, Default)]
pub struct ConnectionHub {
    senders: DashMap<String, OutboundSender>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: &str, sender: OutboundSender) {
        self.senders.insert(connection_id.to_string(), sender);
    }

    pub fn unregister(&self, connection_id: &str) -> bool {
        self.senders.remove(connection_id).is_some()
    }

    /// 发送到单个连接，连接不存在或已关闭时返回 false
    pub fn send(&self, connection_id: &str, message: ServerMessage) -> bool {
        let Some(sender) = self.senders.get(connection_id) else {
            debug!(
                "Dropping {} for unknown connection {}",
                message.event_name(),
                connection_id
            );
            return false;
        };

        if sender.send(Outbound::Message(message)).is_err() {
            warn!("Outbound queue of connection {} is closed", connection_id);
            return false;
        }
        true
    }

    /// 广播到所有连接（可排除一个），返回成功投递数
    pub fn broadcast(&self, message: &ServerMessage, except: Option<&str>) -> usize {
        let targets: Vec<(String, OutboundSender)> = self
            .senders
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != except)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        targets
            .into_iter()
            .filter(|(connection_id, sender)| {
                let sent = sender.send(Outbound::Message(message.clone())).is_ok();
                if !sent {
                    debug!("Broadcast skipped closed connection {}", connection_id);
                }
                sent
            })
            .count()
    }

    /// 请求写任务发送关闭帧，并移除该连接
    pub fn close(&self, connection_id: &str, code: u16, reason: &str) {
        if let Some((_, sender)) = self.senders.remove(connection_id) {
            let _ = sender.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_broadcast() {
        let hub = ConnectionHub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register("c1", tx1);
        hub.register("c2", tx2);

        assert!(hub.send("c1", ServerMessage::call_failed("x")));
        assert!(!hub.send("c9", ServerMessage::call_failed("x")));
        assert_eq!(
            rx1.try_recv().unwrap(),
            Outbound::Message(ServerMessage::call_failed("x"))
        );

        let delivered = hub.broadcast(&ServerMessage::call_failed("all"), Some("c1"));
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn closed_receiver_is_not_counted() {
        let hub = ConnectionHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register("c1", tx);
        drop(rx);

        assert!(!hub.send("c1", ServerMessage::call_failed("x")));
        assert_eq!(hub.broadcast(&ServerMessage::call_failed("x"), None), 0);
    }

    #[test]
    fn close_sends_frame_and_unregisters() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register("c1", tx);

        hub.close("c1", CLOSE_SUPERSEDED, "superseded");
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_SUPERSEDED,
                reason: "superseded".to_string()
            }
        );
        assert!(hub.is_empty());
        assert!(!hub.unregister("c1"));
    }
}
