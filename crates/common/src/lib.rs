//! callrelay 基础设施库
//!
//! 为信令网关和审计日志服务提供共享组件：统一配置、错误类型与 Prometheus 指标

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types for convenience
pub use config::CallRelayConfig;
pub use error::ConfigError;
