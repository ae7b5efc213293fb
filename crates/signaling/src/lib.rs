//! WebRTC 呼叫信令网关
//!
//! 通过 WebSocket 在两个已认证用户之间中继 SDP offer/answer 和 ICE candidate，
//! 维护呼叫会话状态机，并把呼叫生命周期事件写入两个 gRPC 审计日志通道。
//!
//! # 模块结构
//!
//! ## 核心模块
//! - [`lifecycle`]: 连接认证、上线与下线
//! - [`presence`]: 在线状态表
//! - [`session`]: 呼叫会话表与状态机
//! - [`relay`]: 信令中继
//! - [`audit`]: 审计日志与回退策略
//!
//! ## 接入层
//! - [`server`]: WebSocket 连接读写任务
//! - [`axum_router`]: 挂载到主 HTTP 服务的 Router
//! - [`gateway`]: 组装以上组件

pub mod audit;
pub mod auth;
pub mod axum_router;
pub mod clock;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod lifecycle;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod types;

pub use audit::{AuditSink, CallAuditLogger, GrpcAuditSink, LogAck, LogRecord};
pub use auth::{Authenticator, Claims, JwtAuthenticator};
pub use axum_router::create_signaling_router;
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use error::{AuditError, AuthError, SignalingError};
pub use gateway::{Gateway, GatewayBuilder};
pub use presence::PresenceRegistry;
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{CallSession, CallSessionTable, CallState};
pub use types::Identity;

pub use server::handle_websocket_connection;
