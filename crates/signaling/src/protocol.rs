//! 信令消息格式
//!
//! 每个 WebSocket 文本帧都是 `{"event": "<kind>", "data": {...}}`，`data` 字段使用 camelCase。
//! SDP offer/answer 与 ICE candidate 原样透传，网关只检查它们存在。

use crate::error::ProtocolError;
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 客户端 -> 网关
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    CallUser(CallUser),
    AcceptCall(AcceptCall),
    RejectCall(RejectCall),
    IceCandidate(IceCandidate),
    EndCall(EndCall),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUser {
    pub to: String,
    pub offer: Value,
    /// 兼容字段，实际主叫身份取自认证结果
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptCall {
    pub to: String,
    pub answer: Value,
    pub call_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCall {
    pub to: String,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub to: String,
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCall {
    pub to: String,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClientMessage {
    /// 解析并校验一个文本帧
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CallUser(_) => "call_user",
            ClientMessage::AcceptCall(_) => "accept_call",
            ClientMessage::RejectCall(_) => "reject_call",
            ClientMessage::IceCandidate(_) => "ice_candidate",
            ClientMessage::EndCall(_) => "end_call",
        }
    }

    /// 目标用户 id
    pub fn target(&self) -> &str {
        match self {
            ClientMessage::CallUser(m) => &m.to,
            ClientMessage::AcceptCall(m) => &m.to,
            ClientMessage::RejectCall(m) => &m.to,
            ClientMessage::IceCandidate(m) => &m.to,
            ClientMessage::EndCall(m) => &m.to,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.target().trim().is_empty() {
            return Err(ProtocolError::MissingField("to"));
        }

        match self {
            ClientMessage::CallUser(m) => require_payload(&m.offer, "offer"),
            ClientMessage::AcceptCall(m) => {
                require_call_id(&m.call_id)?;
                require_payload(&m.answer, "answer")
            }
            ClientMessage::RejectCall(m) => require_call_id(&m.call_id),
            ClientMessage::IceCandidate(m) => require_payload(&m.candidate, "candidate"),
            ClientMessage::EndCall(m) => require_call_id(&m.call_id),
        }
    }
}

fn require_call_id(call_id: &str) -> Result<(), ProtocolError> {
    if call_id.trim().is_empty() {
        Err(ProtocolError::MissingField("callId"))
    } else {
        Ok(())
    }
}

fn require_payload(value: &Value, field: &'static str) -> Result<(), ProtocolError> {
    if value.is_null() {
        Err(ProtocolError::MissingField(field))
    } else {
        Ok(())
    }
}

/// 网关 -> 客户端
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        from: String,
        from_username: String,
        offer: Value,
        call_id: String,
    },

    #[serde(rename_all = "camelCase")]
    CallAccepted { answer: Value, call_id: String },

    #[serde(rename_all = "camelCase")]
    CallRejected { call_id: String, reason: String },

    CallFailed { message: String },

    IceCandidate { candidate: Value, from: String },

    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: String, reason: String },

    #[serde(rename_all = "camelCase")]
    UserConnected {
        user_id: String,
        username: String,
        online_users: Vec<Identity>,
        online_count: usize,
    },

    #[serde(rename_all = "camelCase")]
    UserDisconnected {
        user_id: String,
        username: String,
        online_users: Vec<Identity>,
        online_count: usize,
    },
}

impl ServerMessage {
    pub fn call_failed(message: impl Into<String>) -> Self {
        ServerMessage::CallFailed {
            message: message.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::IncomingCall { .. } => "incoming_call",
            ServerMessage::CallAccepted { .. } => "call_accepted",
            ServerMessage::CallRejected { .. } => "call_rejected",
            ServerMessage::CallFailed { .. } => "call_failed",
            ServerMessage::IceCandidate { .. } => "ice_candidate",
            ServerMessage::CallEnded { .. } => "call_ended",
            ServerMessage::UserConnected { .. } => "user_connected",
            ServerMessage::UserDisconnected { .. } => "user_disconnected",
        }
    }
}
