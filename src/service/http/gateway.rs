//! 信令网关 HTTP 服务

use super::metrics_endpoint;
use crate::error::{Error, Result};
use crate::service::trace::http_trace_layer;
use crate::service::{ServiceInfo, ServiceType};
use axum::{Router, routing::get};
use signaling::{Gateway, create_signaling_router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

pub struct GatewayService {
    gateway: Gateway,
    ws_path: String,
}

impl GatewayService {
    pub fn new(gateway: Gateway, ws_path: impl Into<String>) -> Self {
        Self {
            gateway,
            ws_path: ws_path.into(),
        }
    }

    /// 信令 WebSocket + `/health` + `/metrics`
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(Any)
            .allow_headers(Any);

        create_signaling_router(self.gateway.clone(), &self.ws_path)
            .route("/health", get(|| async { "OK" }))
            .route("/metrics", get(metrics_endpoint))
            .layer(http_trace_layer())
            .layer(cors)
    }

    /// 绑定地址并启动
    pub async fn start(
        self,
        addr: SocketAddr,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(ServiceInfo, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::service_startup(format!("Failed to bind gateway on {addr}: {e}")))?;
        self.start_on(listener, shutdown_tx)
    }

    /// 在已绑定的监听器上启动
    ///
    /// 服务器退出后取消会话驱逐定时器，并在审计超时内等待进行中的写入。
    pub fn start_on(
        self,
        listener: TcpListener,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(ServiceInfo, JoinHandle<()>)> {
        let addr = listener.local_addr()?;
        let info = ServiceInfo::new("Signaling Gateway", ServiceType::Gateway, addr);
        let app = self.build_router();
        let gateway = self.gateway;
        let mut shutdown_rx = shutdown_tx.subscribe();

        info!("Signaling gateway listening on {} (ws path {})", addr, self.ws_path);

        let handle = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Gateway received shutdown signal");
            });

            if let Err(e) = server.await {
                error!("Gateway HTTP server error: {}", e);
                let _ = shutdown_tx.send(());
            }

            gateway.shutdown().await;
            info!("Gateway stopped");
        });

        Ok((info, handle))
    }
}
