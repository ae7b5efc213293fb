//! LogService gRPC 服务启动

use crate::error::{Error, Result};
use crate::service::{ServiceInfo, ServiceType};
use logsink::LogSinkService;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug)]
pub struct LogSinkGrpcService {
    service: LogSinkService,
    service_type: ServiceType,
}

impl LogSinkGrpcService {
    pub fn accepted() -> Self {
        Self {
            service: LogSinkService::accepted(),
            service_type: ServiceType::AcceptedSink,
        }
    }

    pub fn rejected() -> Self {
        Self {
            service: LogSinkService::rejected(),
            service_type: ServiceType::RejectedSink,
        }
    }

    pub fn service(&self) -> &LogSinkService {
        &self.service
    }

    pub async fn start(
        self,
        addr: SocketAddr,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(ServiceInfo, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::service_startup(format!(
                "Failed to bind {} log service on {addr}: {e}",
                self.service.channel()
            ))
        })?;
        self.start_on(listener, shutdown_tx)
    }

    pub fn start_on(
        self,
        listener: TcpListener,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(ServiceInfo, JoinHandle<()>)> {
        let addr = listener.local_addr()?;
        let channel = self.service.channel();
        let info = ServiceInfo::new(format!("{channel} LogService"), self.service_type, addr);
        let mut shutdown_rx = shutdown_tx.subscribe();

        info!("Starting {} gRPC log service on {}", channel, addr);

        let handle = tokio::spawn(async move {
            let result = self
                .service
                .serve_on(listener, async move {
                    let _ = shutdown_rx.recv().await;
                    info!("{} log service received shutdown signal", channel);
                })
                .await;

            if let Err(e) = result {
                error!("{} log service error: {}", channel, e);
                let _ = shutdown_tx.send(());
            }
            info!("{} log service stopped", channel);
        });

        Ok((info, handle))
    }
}
