//! gRPC 服务
//!
//! 内置的两个 LogService 实现（AcceptedChannel / RejectedChannel）

pub mod logsink;

pub use logsink::LogSinkGrpcService;
