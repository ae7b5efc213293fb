//! 网关组装
//!
//! [`Gateway`] 持有一次部署的全部状态（在线表、会话表、出站队列表）和协作方，
//! 生命周期与 HTTP 服务一致：启动时创建，关闭时取消定时器并等待审计写入。

use crate::audit::{AuditSink, CallAuditLogger, GrpcAuditSink};
use crate::auth::{Authenticator, JwtAuthenticator};
use crate::clock::{Clock, SystemClock};
use crate::directory::{InMemoryUserDirectory, UserDirectory};
use crate::error::{Result, SignalingError};
use crate::hub::ConnectionHub;
use crate::lifecycle::ConnectionLifecycleManager;
use crate::presence::PresenceRegistry;
use crate::relay::{EvictionPolicy, SignalingRelay};
use crate::session::CallSessionTable;
use callrelay_common::config::CallRelayConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Clone)]
pub struct Gateway {
    lifecycle: Arc<ConnectionLifecycleManager>,
    relay: Arc<SignalingRelay>,
    presence: Arc<PresenceRegistry>,
    hub: Arc<ConnectionHub>,
    audit_timeout: Duration,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// 按配置构建：JWT 认证、内存用户目录、两个 gRPC 日志通道
    pub fn from_config(config: &CallRelayConfig) -> Result<Self> {
        let accepted = GrpcAuditSink::connect_lazy(&config.audit.accepted_endpoint, &config.audit)?;
        let rejected = GrpcAuditSink::connect_lazy(&config.audit.rejected_endpoint, &config.audit)?;
        let directory = InMemoryUserDirectory::from_config(&config.directory);
        info!(
            "Gateway configured: {} directory users, audit channels {} / {}",
            directory.len(),
            accepted.endpoint(),
            rejected.endpoint()
        );

        Self::builder()
            .authenticator(Arc::new(JwtAuthenticator::new(&config.signaling.jwt_secret)))
            .directory(Arc::new(directory))
            .audit_sinks(Arc::new(accepted), Arc::new(rejected))
            .audit_timeout(config.audit.timeout())
            .eviction(EvictionPolicy {
                after_reject: config.signaling.reject_eviction(),
                after_end: config.signaling.end_eviction(),
            })
            .build()
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycleManager {
        &self.lifecycle
    }

    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn sessions(&self) -> &CallSessionTable {
        self.relay.sessions()
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// 连接断开：下线，用户彻底离线时结束其未终结的呼叫
    pub async fn disconnect(&self, connection_id: &str) {
        if let Some(identity) = self.lifecycle.disconnect(connection_id).await {
            self.relay.end_calls_for(&identity);
        }
    }

    /// 取消会话驱逐并在审计超时内等待进行中的写入
    pub async fn shutdown(&self) {
        info!("Shutting down signaling gateway");
        self.relay.shutdown(self.audit_timeout).await;
    }
}

#[derive(Default)]
pub struct GatewayBuilder {
    authenticator: Option<Arc<dyn Authenticator>>,
    directory: Option<Arc<dyn UserDirectory>>,
    sinks: Option<(Arc<dyn AuditSink>, Arc<dyn AuditSink>)>,
    clock: Option<Arc<dyn Clock>>,
    audit_timeout: Option<Duration>,
    eviction: Option<EvictionPolicy>,
}

impl GatewayBuilder {
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn audit_sinks(
        mut self,
        accepted: Arc<dyn AuditSink>,
        rejected: Arc<dyn AuditSink>,
    ) -> Self {
        self.sinks = Some((accepted, rejected));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = Some(timeout);
        self
    }

    pub fn eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = Some(eviction);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let authenticator = self
            .authenticator
            .ok_or_else(|| SignalingError::Config("authenticator is required".to_string()))?;
        let directory = self
            .directory
            .ok_or_else(|| SignalingError::Config("user directory is required".to_string()))?;
        let (accepted, rejected) = self
            .sinks
            .ok_or_else(|| SignalingError::Config("audit sinks are required".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let audit_timeout = self.audit_timeout.unwrap_or(DEFAULT_AUDIT_TIMEOUT);

        let presence = Arc::new(PresenceRegistry::new(clock.clone()));
        let hub = Arc::new(ConnectionHub::new());
        let sessions = CallSessionTable::new(clock.clone());
        let audit = CallAuditLogger::new(accepted, rejected, audit_timeout, clock.clone());

        let lifecycle = ConnectionLifecycleManager::new(
            authenticator,
            directory,
            presence.clone(),
            hub.clone(),
        );
        let relay = SignalingRelay::new(
            presence.clone(),
            sessions,
            hub.clone(),
            audit,
            clock,
            self.eviction.unwrap_or_default(),
        );

        Ok(Gateway {
            lifecycle: Arc::new(lifecycle),
            relay: Arc::new(relay),
            presence,
            hub,
            audit_timeout,
        })
    }
}
