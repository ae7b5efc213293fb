//! HTTP 服务
//!
//! 信令网关与运维端点共用一个监听端口

mod gateway;

pub use gateway::GatewayService;

/// Prometheus metrics endpoint
async fn metrics_endpoint() -> String {
    callrelay_common::metrics::export_metrics()
}
