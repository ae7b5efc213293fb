//! 统一错误处理模型
//!
//! callrelay 进程的顶层错误类型，聚合配置、信令网关和日志服务的错误

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // ========== 配置相关错误 ==========
    #[error("Configuration error: {0}")]
    Config(#[from] callrelay_common::ConfigError),

    // ========== 服务相关错误 ==========
    /// 信令网关错误
    #[error("Signaling gateway error: {0}")]
    Signaling(#[from] signaling::SignalingError),

    /// 审计日志服务错误
    #[error("Log sink error: {0}")]
    LogSink(#[from] logsink::LogSinkError),

    // ========== 系统级错误 ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    // ========== 业务逻辑错误 ==========
    #[error("Service startup failed: {message}")]
    ServiceStartup { message: String },

    #[error("Service configuration validation failed: {message}")]
    ServiceValidation { message: String },

    // ========== 通用错误 ==========
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Application error: {message}")]
    Custom { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    pub fn service_startup(message: impl Into<String>) -> Self {
        Self::ServiceStartup {
            message: message.into(),
        }
    }

    pub fn service_validation(message: impl Into<String>) -> Self {
        Self::ServiceValidation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_variants() {
        assert!(matches!(Error::custom("x"), Error::Custom { .. }));
        assert!(matches!(
            Error::service_startup("bind failed"),
            Error::ServiceStartup { .. }
        ));
        let err = Error::service_validation("bad enable");
        assert_eq!(
            err.to_string(),
            "Service configuration validation failed: bad enable"
        );
    }

    #[test]
    fn wraps_gateway_errors() {
        let err: Error = signaling::SignalingError::Config("missing sinks".to_string()).into();
        assert!(err.to_string().starts_with("Signaling gateway error"));
    }
}
