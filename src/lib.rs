//! # callrelay
//!
//! WebRTC 呼叫信令网关，以及接通/未接通两个通话审计日志服务

pub mod error;
pub mod service;

pub use callrelay_common::config::CallRelayConfig;
pub use service::{ServiceInfo, ServiceManager, ServiceType};
