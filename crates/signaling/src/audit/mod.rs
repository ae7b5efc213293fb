//! 呼叫审计日志
//!
//! 两个独立的日志通道（Accepted / Rejected）共用 [`AuditSink`] 抽象，
//! 回退策略只在 [`CallAuditLogger`] 中实现一次。
//!
//! 所有写入都是 at-most-once：失败只在本地记录日志和指标，不重试、不向信令路径传播。

pub mod grpc;

pub use grpc::GrpcAuditSink;

use crate::clock::Clock;
use crate::error::AuditError;
use crate::types::Identity;
use async_trait::async_trait;
use callrelay_common::metrics::{AUDIT_FAILURES, AUDIT_WRITES};
use callrelay_proto::LogCallRequest;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display};
use tracing::{debug, warn};

pub const REASON_INITIATED: &str = "Call initiated";
pub const REASON_ACCEPTED: &str = "Call accepted by user";
pub const REASON_REJECTED: &str = "User rejected the call";
pub const REASON_ENDED: &str = "Call ended by user";
pub const REASON_PEER_DISCONNECTED: &str = "Peer disconnected";
pub const REASON_ACCEPTED_FALLBACK: &str = "accepted channel unavailable - fallback";

/// 审计动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CallAction {
    CallInitiated,
    CallAccepted,
    CallRejected,
    CallEnded,
}

/// 日志通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuditChannel {
    Accepted,
    Rejected,
}

/// 一条审计记录
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub call_id: String,
    pub caller_id: String,
    pub caller_username: String,
    pub callee_id: String,
    pub callee_username: String,
    pub action: CallAction,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    pub reason: String,
}

impl LogRecord {
    /// `2025-01-02T03:04:05.678Z`
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn to_request(&self) -> LogCallRequest {
        LogCallRequest {
            call_id: self.call_id.clone(),
            caller_id: self.caller_id.clone(),
            caller_username: self.caller_username.clone(),
            callee_id: self.callee_id.clone(),
            callee_username: self.callee_username.clone(),
            action: self.action.to_string(),
            timestamp: self.timestamp_string(),
            duration: format_duration(self.duration_seconds),
            reason: self.reason.clone(),
        }
    }
}

/// 两位小数；无时长时为 `"0"`
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(seconds) => format!("{seconds:.2}"),
        None => "0".to_string(),
    }
}

/// LogCall 应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAck {
    pub success: bool,
    pub message: String,
}

/// 单个日志通道
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_call(&self, record: &LogRecord) -> Result<LogAck, AuditError>;
}

/// 生成审计记录所需的呼叫数据
#[derive(Debug, Clone)]
pub struct CallData {
    pub call_id: String,
    pub caller: Identity,
    pub callee: Identity,
    pub reason: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl CallData {
    pub fn new(call_id: impl Into<String>, caller: Identity, callee: Identity) -> Self {
        Self {
            call_id: call_id.into(),
            caller,
            callee,
            reason: None,
            duration_seconds: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_duration(mut self, seconds: Option<f64>) -> Self {
        self.duration_seconds = seconds;
        self
    }
}

/// 审计日志记录器
#[derive(Clone)]
pub struct CallAuditLogger {
    accepted: Arc<dyn AuditSink>,
    rejected: Arc<dyn AuditSink>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl CallAuditLogger {
    pub fn new(
        accepted: Arc<dyn AuditSink>,
        rejected: Arc<dyn AuditSink>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accepted,
            rejected,
            timeout,
            clock,
        }
    }

    /// CALL_INITIATED，只写 RejectedChannel 一次
    pub async fn log_initiated(&self, data: CallData) {
        let record = self.record(&data, CallAction::CallInitiated, REASON_INITIATED);
        let _ = self.write(AuditChannel::Rejected, &record).await;
    }

    /// CALL_ACCEPTED，AcceptedChannel 失败时回退写一次 RejectedChannel
    pub async fn log_accepted(&self, data: CallData) {
        let record = self.record(&data, CallAction::CallAccepted, REASON_ACCEPTED);
        if self.write(AuditChannel::Accepted, &record).await.is_ok() {
            return;
        }

        let fallback = LogRecord {
            reason: REASON_ACCEPTED_FALLBACK.to_string(),
            ..record
        };
        let _ = self.write(AuditChannel::Rejected, &fallback).await;
    }

    /// CALL_REJECTED，只写 RejectedChannel
    pub async fn log_rejected(&self, data: CallData) {
        let record = self.record(&data, CallAction::CallRejected, REASON_REJECTED);
        let _ = self.write(AuditChannel::Rejected, &record).await;
    }

    /// CALL_ENDED，RejectedChannel 总是写入；接通过的呼叫同时写 AcceptedChannel
    pub async fn log_ended(&self, data: CallData, was_accepted: bool) {
        let record = self.record(&data, CallAction::CallEnded, REASON_ENDED);

        let accepted = async {
            if was_accepted {
                let _ = self.write(AuditChannel::Accepted, &record).await;
            }
        };
        let rejected = async {
            let _ = self.write(AuditChannel::Rejected, &record).await;
        };
        tokio::join!(accepted, rejected);
    }

    fn record(&self, data: &CallData, action: CallAction, default_reason: &str) -> LogRecord {
        let reason = data
            .reason
            .as_deref()
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or(default_reason)
            .to_string();

        LogRecord {
            call_id: data.call_id.clone(),
            caller_id: data.caller.user_id.clone(),
            caller_username: data.caller.username.clone(),
            callee_id: data.callee.user_id.clone(),
            callee_username: data.callee.username.clone(),
            action,
            timestamp: self.clock.now(),
            duration_seconds: data.duration_seconds,
            reason,
        }
    }

    async fn write(&self, channel: AuditChannel, record: &LogRecord) -> Result<(), AuditError> {
        let sink = match channel {
            AuditChannel::Accepted => &self.accepted,
            AuditChannel::Rejected => &self.rejected,
        };

        let result = match tokio::time::timeout(self.timeout, sink.log_call(record)).await {
            Ok(Ok(ack)) if ack.success => Ok(ack),
            Ok(Ok(ack)) => Err(AuditError::Refused(ack.message)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AuditError::Timeout(self.timeout)),
        };

        let labels = [channel.as_ref(), record.action.as_ref()];
        match result {
            Ok(ack) => {
                AUDIT_WRITES.with_label_values(&labels).inc();
                debug!(
                    call_id = %record.call_id,
                    "{} logged to {} channel: {}",
                    record.action, channel, ack.message
                );
                Ok(())
            }
            Err(e) => {
                AUDIT_FAILURES.with_label_values(&labels).inc();
                warn!(
                    call_id = %record.call_id,
                    "Failed to log {} to {} channel: {}",
                    record.action, channel, e
                );
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for CallAuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallAuditLogger")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// 测试用日志通道：记录收到的每条记录，按脚本返回结果
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SinkBehavior {
        Ack,
        Refuse,
        Unavailable,
        Hang,
    }

    /// 记录型 AuditSink
    #[derive(Debug)]
    pub struct RecordingSink {
        behavior: Mutex<SinkBehavior>,
        records: Mutex<Vec<LogRecord>>,
    }

    impl RecordingSink {
        pub fn new(behavior: SinkBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior: Mutex::new(behavior),
                records: Mutex::new(Vec::new()),
            })
        }

        pub fn set_behavior(&self, behavior: SinkBehavior) {
            *self.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
        }

        pub fn records(&self) -> Vec<LogRecord> {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn log_call(&self, record: &LogRecord) -> Result<LogAck, AuditError> {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record.clone());

            let behavior = *self.behavior.lock().unwrap_or_else(|e| e.into_inner());
            match behavior {
                SinkBehavior::Ack => Ok(LogAck {
                    success: true,
                    message: "ok".to_string(),
                }),
                SinkBehavior::Refuse => Ok(LogAck {
                    success: false,
                    message: "refused".to_string(),
                }),
                SinkBehavior::Unavailable => {
                    Err(tonic::Status::unavailable("sink is down").into())
                }
                SinkBehavior::Hang => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingSink, SinkBehavior};
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn call_data() -> CallData {
        CallData::new(
            "u1-u2-1000",
            Identity::new("u1", "alice"),
            Identity::new("u2", "bob"),
        )
    }

    fn logger(
        accepted: &Arc<RecordingSink>,
        rejected: &Arc<RecordingSink>,
    ) -> CallAuditLogger {
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
                + chrono::Duration::milliseconds(678),
        );
        CallAuditLogger::new(
            accepted.clone(),
            rejected.clone(),
            Duration::from_millis(100),
            Arc::new(clock),
        )
    }

    #[test]
    fn record_converts_to_wire_request() {
        let record = LogRecord {
            call_id: "c1".to_string(),
            caller_id: "u1".to_string(),
            caller_username: "alice".to_string(),
            callee_id: "u2".to_string(),
            callee_username: "bob".to_string(),
            action: CallAction::CallEnded,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
                + chrono::Duration::milliseconds(678),
            duration_seconds: Some(12.3449),
            reason: "Call ended by user".to_string(),
        };

        let request = record.to_request();
        assert_eq!(request.action, "CALL_ENDED");
        assert_eq!(request.timestamp, "2025-01-02T03:04:05.678Z");
        assert_eq!(request.duration, "12.34");
        assert_eq!(format_duration(None), "0");
        assert_eq!(format_duration(Some(0.0)), "0.00");
    }

    #[tokio::test]
    async fn initiated_writes_once_to_rejected_channel() {
        let accepted = RecordingSink::new(SinkBehavior::Ack);
        let rejected = RecordingSink::new(SinkBehavior::Ack);

        logger(&accepted, &rejected).log_initiated(call_data()).await;

        assert!(accepted.records().is_empty());
        let records = rejected.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, CallAction::CallInitiated);
        assert_eq!(records[0].reason, REASON_INITIATED);
    }

    #[tokio::test]
    async fn accepted_success_has_no_fallback() {
        let accepted = RecordingSink::new(SinkBehavior::Ack);
        let rejected = RecordingSink::new(SinkBehavior::Ack);

        logger(&accepted, &rejected).log_accepted(call_data()).await;

        assert_eq!(accepted.records().len(), 1);
        assert_eq!(accepted.records()[0].reason, REASON_ACCEPTED);
        assert!(rejected.records().is_empty());
    }

    #[tokio::test]
    async fn accepted_failure_falls_back_exactly_once() {
        for behavior in [SinkBehavior::Unavailable, SinkBehavior::Refuse] {
            let accepted = RecordingSink::new(behavior);
            let rejected = RecordingSink::new(SinkBehavior::Unavailable);

            logger(&accepted, &rejected).log_accepted(call_data()).await;

            assert_eq!(accepted.records().len(), 1);
            let fallback = rejected.records();
            assert_eq!(fallback.len(), 1, "{behavior:?}");
            assert_eq!(fallback[0].action, CallAction::CallAccepted);
            assert_eq!(fallback[0].reason, REASON_ACCEPTED_FALLBACK);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_sink_times_out_and_falls_back() {
        let accepted = RecordingSink::new(SinkBehavior::Hang);
        let rejected = RecordingSink::new(SinkBehavior::Ack);

        logger(&accepted, &rejected).log_accepted(call_data()).await;

        assert_eq!(rejected.records().len(), 1);
        assert_eq!(rejected.records()[0].reason, REASON_ACCEPTED_FALLBACK);
    }

    #[tokio::test]
    async fn rejected_uses_client_reason_or_default() {
        let accepted = RecordingSink::new(SinkBehavior::Ack);
        let rejected = RecordingSink::new(SinkBehavior::Unavailable);
        let logger = logger(&accepted, &rejected);

        logger
            .log_rejected(call_data().with_reason(Some("busy".to_string())))
            .await;
        logger.log_rejected(call_data()).await;

        let records = rejected.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reason, "busy");
        assert_eq!(records[1].reason, REASON_REJECTED);
        assert!(accepted.records().is_empty());
    }

    #[tokio::test]
    async fn ended_writes_both_channels_when_accepted() {
        let accepted = RecordingSink::new(SinkBehavior::Unavailable);
        let rejected = RecordingSink::new(SinkBehavior::Ack);
        let logger = logger(&accepted, &rejected);

        logger
            .log_ended(call_data().with_duration(Some(12.34)), true)
            .await;

        assert_eq!(accepted.records().len(), 1);
        let records = rejected.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, CallAction::CallEnded);
        assert_eq!(records[0].reason, REASON_ENDED);
        assert_eq!(records[0].to_request().duration, "12.34");
    }

    #[tokio::test]
    async fn ended_before_accept_only_writes_rejected_channel() {
        let accepted = RecordingSink::new(SinkBehavior::Ack);
        let rejected = RecordingSink::new(SinkBehavior::Ack);

        logger(&accepted, &rejected)
            .log_ended(call_data().with_reason(Some("hung up".to_string())), false)
            .await;

        assert!(accepted.records().is_empty());
        assert_eq!(rejected.records()[0].reason, "hung up");
    }
}
