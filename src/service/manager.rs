//! 服务管理器
//!
//! 按 `enable` 位掩码启动服务。日志服务先于网关启动，
//! 网关的审计通道是惰性连接，同进程内的日志服务就绪后第一次写入即可连上。

use crate::error::{Error, Result};
use crate::service::{GatewayService, LogSinkGrpcService, ServiceInfo};
use callrelay_common::config::CallRelayConfig;
use signaling::Gateway;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug)]
pub struct ServiceManager {
    config: CallRelayConfig,
    shutdown_tx: broadcast::Sender<()>,
    running: Vec<ServiceInfo>,
}

impl ServiceManager {
    pub fn new(config: CallRelayConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            config,
            shutdown_tx,
            running: Vec::new(),
        }
    }

    /// 启动所有已启用的服务，任一绑定失败即返回错误
    pub async fn start_all(&mut self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        if self.config.is_rejected_sink_enabled() {
            let addr = self
                .config
                .sinks
                .rejected_addr()
                .map_err(Error::service_startup)?;
            let (info, handle) = LogSinkGrpcService::rejected()
                .start(addr, self.shutdown_tx.clone())
                .await?;
            self.running.push(info);
            handles.push(handle);
        }

        if self.config.is_accepted_sink_enabled() {
            let addr = self
                .config
                .sinks
                .accepted_addr()
                .map_err(Error::service_startup)?;
            let (info, handle) = LogSinkGrpcService::accepted()
                .start(addr, self.shutdown_tx.clone())
                .await?;
            self.running.push(info);
            handles.push(handle);
        }

        if self.config.is_gateway_enabled() {
            let addr = self
                .config
                .bind
                .socket_addr()
                .map_err(Error::service_startup)?;
            let gateway = Gateway::from_config(&self.config)?;
            let service = GatewayService::new(gateway, self.config.signaling.ws_path.clone());
            let (info, handle) = service.start(addr, self.shutdown_tx.clone()).await?;
            self.running.push(info);
            handles.push(handle);
        }

        info!(
            "Started {} service(s): {}",
            self.running.len(),
            self.running
                .iter()
                .map(|s| s.service_type.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(handles)
    }

    pub fn running(&self) -> &[ServiceInfo] {
        &self.running
    }

    /// 广播关闭信号
    pub fn stop_all(&self) {
        info!("Stopping all services");
        let _ = self.shutdown_tx.send(());
    }
}
