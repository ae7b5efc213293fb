//! Prometheus 监控指标模块
//!
//! 提供全局指标收集和导出功能

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static METRICS_INIT: Once = Once::new();

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== 连接指标 ==========

    /// WebSocket 连接数（含尚未完成认证的连接）
    pub static ref WEBSOCKET_CONNECTIONS: IntGauge = IntGauge::new(
        "callrelay_websocket_connections",
        "Number of active WebSocket connections"
    ).unwrap();

    /// 在线用户数（PresenceRegistry 条目数）
    pub static ref ONLINE_USERS: IntGauge = IntGauge::new(
        "callrelay_online_users",
        "Number of authenticated users currently online"
    ).unwrap();

    // ========== 信令指标 ==========

    /// 收到的信令消息数（按事件类型）
    pub static ref SIGNALING_MESSAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("callrelay_signaling_messages_total", "Total number of inbound signaling messages"),
        &["event"]
    ).unwrap();

    /// 呼叫状态事件数
    pub static ref CALL_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("callrelay_call_events_total", "Total number of call lifecycle events"),
        &["action"]
    ).unwrap();

    // ========== 安全指标 ==========

    /// 认证失败次数
    pub static ref AUTH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("callrelay_auth_failures_total", "Total number of authentication failures"),
        &["reason"]
    ).unwrap();

    /// 非法消息次数
    pub static ref INVALID_MESSAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("callrelay_invalid_messages_total", "Total number of malformed signaling messages"),
        &["reason"]
    ).unwrap();

    // ========== 审计指标 ==========

    /// 审计写入成功次数
    pub static ref AUDIT_WRITES: IntCounterVec = IntCounterVec::new(
        Opts::new("callrelay_audit_writes_total", "Total number of acknowledged audit writes"),
        &["channel", "action"]
    ).unwrap();

    /// 审计写入失败次数（RPC 错误、超时或 success=false）
    pub static ref AUDIT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("callrelay_audit_failures_total", "Total number of failed audit writes"),
        &["channel", "action"]
    ).unwrap();
}

/// 注册所有指标到全局 Registry
///
/// This function is idempotent - calling it multiple times is safe.
/// Only the first call will actually register the metrics.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let mut result = Ok(());

    METRICS_INIT.call_once(|| {
        let register_result = (|| {
            REGISTRY.register(Box::new(WEBSOCKET_CONNECTIONS.clone()))?;
            REGISTRY.register(Box::new(ONLINE_USERS.clone()))?;

            REGISTRY.register(Box::new(SIGNALING_MESSAGES.clone()))?;
            REGISTRY.register(Box::new(CALL_EVENTS.clone()))?;

            REGISTRY.register(Box::new(AUTH_FAILURES.clone()))?;
            REGISTRY.register(Box::new(INVALID_MESSAGES.clone()))?;

            REGISTRY.register(Box::new(AUDIT_WRITES.clone()))?;
            REGISTRY.register(Box::new(AUDIT_FAILURES.clone()))?;

            Ok::<(), prometheus::Error>(())
        })();

        if let Err(e) = register_result {
            result = Err(e);
        }
    });

    result
}

/// 导出 Prometheus 格式的指标
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
