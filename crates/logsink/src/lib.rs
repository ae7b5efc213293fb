//! 呼叫审计日志服务
//!
//! 实现 `logs.v1.LogService`。同一实现以两个实例分别监听 accepted 通道和 rejected 通道，
//! 收到记录后写一条 tracing 日志并确认。

pub mod error;
pub mod service;

pub use error::{LogSinkError, Result};
pub use service::LogSinkService;
