//! LogService gRPC 服务实现

use crate::error::{LogSinkError, Result};
use callrelay_proto::{LogCallRequest, LogCallResponse, LogService, LogServiceServer};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

/// 单个日志通道的 LogService 实现
///
/// 只确认收到并记录日志，不持久化。
#[derive(Debug, Clone)]
pub struct LogSinkService {
    channel: &'static str,
    received: Arc<AtomicU64>,
}

impl LogSinkService {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 接通呼叫日志通道
    pub fn accepted() -> Self {
        Self::new("accepted-call")
    }

    /// 拒绝/未接通呼叫日志通道
    pub fn rejected() -> Self {
        Self::new("rejected-call")
    }

    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// 已确认的记录数
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn into_server(self) -> LogServiceServer<Self> {
        LogServiceServer::new(self)
    }

    /// 在 `addr` 上提供服务，直到 `shutdown` 完成
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LogSinkError::Bind { addr, source })?;
        self.serve_on(listener, shutdown).await
    }

    /// 在已绑定的 listener 上提供服务
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let channel = self.channel;
        if let Ok(addr) = listener.local_addr() {
            info!("LogService ({}) listening on {}", channel, addr);
        }

        Server::builder()
            .add_service(self.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;

        info!("LogService ({}) stopped", channel);
        Ok(())
    }
}

#[tonic::async_trait]
impl LogService for LogSinkService {
    async fn log_call(
        &self,
        request: Request<LogCallRequest>,
    ) -> std::result::Result<Response<LogCallResponse>, Status> {
        let record = request.into_inner();

        if record.call_id.trim().is_empty() {
            debug!("Rejecting record without call_id on {}", self.channel);
            return Err(Status::invalid_argument("call_id is required"));
        }

        info!(
            channel = self.channel,
            call_id = %record.call_id,
            action = %record.action,
            caller = %format_args!("{}({})", record.caller_username, record.caller_id),
            callee = %format_args!("{}({})", record.callee_username, record.callee_id),
            duration = %record.duration,
            timestamp = %record.timestamp,
            "{}",
            record.reason
        );
        self.received.fetch_add(1, Ordering::Relaxed);

        Ok(Response::new(LogCallResponse {
            success: true,
            message: format!("Logged by {} successfully", self.channel),
        }))
    }
}
