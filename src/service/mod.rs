//! 服务管理
//!
//! callrelay 进程内最多运行三个服务，由 `enable` 位掩码控制：
//!
//! - 信令网关（axum，WebSocket + `/health` + `/metrics`）
//! - AcceptedChannel 日志服务（tonic）
//! - RejectedChannel 日志服务（tonic）
//!
//! 所有服务共享一个 `broadcast` 关闭通道。

pub mod grpc;
pub mod http;
pub mod manager;
pub mod trace;

use serde::Serialize;
use std::net::SocketAddr;
use strum::Display;

pub use grpc::LogSinkGrpcService;
pub use http::GatewayService;
pub use manager::ServiceManager;

#[derive(Debug, Clone, Copy, Serialize, Display, PartialEq, Eq)]
pub enum ServiceType {
    Gateway,
    AcceptedSink,
    RejectedSink,
}

/// 已启动服务的基本信息
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub service_type: ServiceType,
    pub addr: SocketAddr,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, service_type: ServiceType, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            service_type,
            addr,
        }
    }

    /// 对外展示的访问地址
    pub fn url(&self) -> String {
        match self.service_type {
            ServiceType::Gateway => format!("http://{}", self.addr),
            ServiceType::AcceptedSink | ServiceType::RejectedSink => {
                format!("grpc://{}", self.addr)
            }
        }
    }
}
