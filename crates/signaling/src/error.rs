//! Signaling 错误类型
//!
//! 按错误分类定义：认证失败终止连接，其余错误都在本地恢复，不会传播到信令路径。

use std::time::Duration;
use thiserror::Error;

/// 连接认证失败（唯一会导致连接被终止的错误）
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("user {0} not found")]
    UnknownUser(String),

    #[error("user directory unavailable: {0}")]
    Directory(#[from] DirectoryError),
}

impl AuthError {
    /// Prometheus label
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::Expired => "expired",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::UnknownUser(_) => "unknown_user",
            AuthError::Directory(_) => "directory",
        }
    }
}

/// 外部用户目录错误
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory backend unavailable: {0}")]
    Unavailable(String),
}

/// 审计日志写入失败
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid audit endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("audit TLS configuration error: {0}")]
    Tls(String),

    #[error("LogCall RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("LogCall timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink refused the record: {0}")]
    Refused(String),
}

/// 入站消息校验失败
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("field '{0}' is required")]
    MissingField(&'static str),
}

impl ProtocolError {
    /// Prometheus label
    pub fn reason(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::MissingField(_) => "missing_field",
        }
    }
}

/// 呼叫会话表错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("call {0} already exists")]
    DuplicateCall(String),
}

/// 网关构建与运行错误
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("audit sink setup failed: {0}")]
    Audit(#[from] AuditError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SignalingError>;
