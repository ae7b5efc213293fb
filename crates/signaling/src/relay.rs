//! 信令中继
//!
//! 每种入站消息一个处理函数。处理函数是同步的：在线状态查询、会话状态迁移和
//! 向对端转发都在同一段不挂起的代码里完成，审计写入在转发之后交给后台任务。

use crate::audit::{
    CallAuditLogger, CallData, REASON_ENDED, REASON_PEER_DISCONNECTED, REASON_REJECTED,
};
use crate::clock::Clock;
use crate::hub::ConnectionHub;
use crate::presence::{PresenceEntry, PresenceRegistry};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::session::{CallEvent, CallSessionTable};
use crate::types::Identity;
use callrelay_common::metrics::CALL_EVENTS;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub const MSG_SENDER_UNKNOWN: &str = "Your user information not found";
pub const MSG_CALLEE_OFFLINE: &str = "User is not online";
pub const MSG_CALLER_NOT_FOUND: &str = "Caller not found";
pub const MSG_SELF_CALL: &str = "Cannot call yourself";
pub const MSG_CALL_NOT_CREATED: &str = "Unable to start call";

/// callId 生成器：`{caller}-{callee}-{millis}`
///
/// 时间戳部分单调递增，同一毫秒内的多次调用依次加一。
#[derive(Debug, Default)]
pub struct CallIdGenerator {
    last_millis: AtomicI64,
}

impl CallIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, caller_id: &str, callee_id: &str, now_millis: i64) -> String {
        let previous = self
            .last_millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now_millis.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let millis = now_millis.max(previous + 1);
        format!("{caller_id}-{callee_id}-{millis}")
    }
}

/// 宽限期配置
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    pub after_reject: Duration,
    pub after_end: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            after_reject: Duration::from_millis(5000),
            after_end: Duration::from_millis(3000),
        }
    }
}

pub struct SignalingRelay {
    presence: Arc<PresenceRegistry>,
    sessions: CallSessionTable,
    hub: Arc<ConnectionHub>,
    audit: CallAuditLogger,
    tasks: TaskTracker,
    ids: CallIdGenerator,
    clock: Arc<dyn Clock>,
    eviction: EvictionPolicy,
}

impl SignalingRelay {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        sessions: CallSessionTable,
        hub: Arc<ConnectionHub>,
        audit: CallAuditLogger,
        clock: Arc<dyn Clock>,
        eviction: EvictionPolicy,
    ) -> Self {
        Self {
            presence,
            sessions,
            hub,
            audit,
            tasks: TaskTracker::new(),
            ids: CallIdGenerator::new(),
            clock,
            eviction,
        }
    }

    pub fn sessions(&self) -> &CallSessionTable {
        &self.sessions
    }

    /// 处理一条已校验的入站消息
    pub fn handle(&self, connection_id: &str, message: ClientMessage) {
        let Some(sender) = self.presence.by_connection(connection_id) else {
            warn!(
                "{} from connection {} without presence",
                message.event_name(),
                connection_id
            );
            self.fail(connection_id, MSG_SENDER_UNKNOWN);
            return;
        };

        match message {
            ClientMessage::CallUser(m) => self.initiate(&sender, m),
            ClientMessage::AcceptCall(m) => self.accept(&sender, m),
            ClientMessage::RejectCall(m) => self.reject(&sender, m),
            ClientMessage::IceCandidate(m) => self.ice_candidate(&sender, m),
            ClientMessage::EndCall(m) => self.end(&sender, m),
        }
    }

    fn initiate(&self, sender: &PresenceEntry, m: protocol::CallUser) {
        let caller = &sender.identity;

        if m.to == caller.user_id {
            self.fail(&sender.connection_id, MSG_SELF_CALL);
            return;
        }

        if m.from.as_deref().is_some_and(|from| from != caller.user_id)
            || m
                .from_username
                .as_deref()
                .is_some_and(|name| name != caller.username)
        {
            warn!(
                "call_user from {} claims to be {:?}/{:?}, using authenticated identity",
                caller, m.from, m.from_username
            );
        }

        let Some(target) = self.presence.by_user(&m.to) else {
            debug!("{} called offline user {}", caller, m.to);
            self.fail(&sender.connection_id, MSG_CALLEE_OFFLINE);
            return;
        };

        let call_id = self
            .ids
            .next(&caller.user_id, &m.to, self.clock.now().timestamp_millis());
        let session = match self
            .sessions
            .create(&call_id, caller.clone(), target.identity.clone())
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to create call session: {}", e);
                self.fail(&sender.connection_id, MSG_CALL_NOT_CREATED);
                return;
            }
        };

        self.hub.send(
            &target.connection_id,
            ServerMessage::IncomingCall {
                from: caller.user_id.clone(),
                from_username: caller.username.clone(),
                offer: m.offer,
                call_id: call_id.clone(),
            },
        );
        info!("Call {} initiated: {} -> {}", call_id, caller, target.identity);
        CALL_EVENTS.with_label_values(&["initiated"]).inc();

        let audit = self.audit.clone();
        let data = CallData::new(call_id, session.caller, session.callee);
        self.tasks
            .spawn(async move { audit.log_initiated(data).await });
    }

    fn accept(&self, sender: &PresenceEntry, m: protocol::AcceptCall) {
        let Some(caller) = self.presence.by_user(&m.to) else {
            self.fail(&sender.connection_id, MSG_CALLER_NOT_FOUND);
            return;
        };

        let acting = &sender.identity.user_id;
        let Some(session) = self.sessions.transition_if(&m.call_id, CallEvent::Accept, |s| {
            s.callee.user_id == *acting && s.caller.user_id == m.to
        }) else {
            return;
        };

        self.hub.send(
            &caller.connection_id,
            ServerMessage::CallAccepted {
                answer: m.answer,
                call_id: m.call_id.clone(),
            },
        );
        info!("Call {} accepted by {}", m.call_id, sender.identity);
        CALL_EVENTS.with_label_values(&["accepted"]).inc();

        let audit = self.audit.clone();
        let data = CallData::new(m.call_id, session.caller, session.callee);
        self.tasks
            .spawn(async move { audit.log_accepted(data).await });
    }

    fn reject(&self, sender: &PresenceEntry, m: protocol::RejectCall) {
        let Some(caller) = self.presence.by_user(&m.to) else {
            self.fail(&sender.connection_id, MSG_CALLER_NOT_FOUND);
            return;
        };

        let acting = &sender.identity.user_id;
        let Some(session) = self.sessions.transition_if(&m.call_id, CallEvent::Reject, |s| {
            s.callee.user_id == *acting && s.caller.user_id == m.to
        }) else {
            return;
        };

        let reason = resolve_reason(m.reason.as_deref(), REASON_REJECTED);
        self.hub.send(
            &caller.connection_id,
            ServerMessage::CallRejected {
                call_id: m.call_id.clone(),
                reason: reason.clone(),
            },
        );
        info!(
            "Call {} rejected by {}: {}",
            m.call_id, sender.identity, reason
        );
        CALL_EVENTS.with_label_values(&["rejected"]).inc();

        let audit = self.audit.clone();
        let data =
            CallData::new(&m.call_id, session.caller, session.callee).with_reason(Some(reason));
        self.tasks
            .spawn(async move { audit.log_rejected(data).await });

        self.sessions
            .schedule_eviction(&m.call_id, self.eviction.after_reject);
    }

    fn ice_candidate(&self, sender: &PresenceEntry, m: protocol::IceCandidate) {
        match self.presence.by_user(&m.to) {
            Some(target) => {
                self.hub.send(
                    &target.connection_id,
                    ServerMessage::IceCandidate {
                        candidate: m.candidate,
                        from: sender.identity.user_id.clone(),
                    },
                );
            }
            None => debug!(
                "Dropping ICE candidate from {} to offline user {}",
                sender.identity, m.to
            ),
        }
    }

    fn end(&self, sender: &PresenceEntry, m: protocol::EndCall) {
        let reason = resolve_reason(m.reason.as_deref(), REASON_ENDED);
        let acting = &sender.identity;

        let counterparty = match self.sessions.get(&m.call_id) {
            Some(session) => match session.counterparty_of(&acting.user_id) {
                Some(other) => other.user_id.clone(),
                None => {
                    warn!(
                        "{} tried to end call {} without taking part in it",
                        acting, m.call_id
                    );
                    return;
                }
            },
            // 会话已被驱逐，只能按客户端给出的对端转发
            None => m.to.clone(),
        };

        self.notify_ended(&counterparty, &m.call_id, &reason);
        self.close_session(&m.call_id, acting, reason);
    }

    /// 用户彻底离线后结束其仍在进行的呼叫
    ///
    /// 每个会话按一次挂断处理：迁移到 ENDED、通知对端、写审计、调度驱逐。
    pub fn end_calls_for(&self, identity: &Identity) {
        for session in self.sessions.active_for(&identity.user_id) {
            let Some(counterparty) = session.counterparty_of(&identity.user_id) else {
                continue;
            };
            let reason = REASON_PEER_DISCONNECTED.to_string();
            if self.close_session(&session.call_id, identity, reason.clone()) {
                self.notify_ended(&counterparty.user_id, &session.call_id, &reason);
            }
        }
    }

    fn notify_ended(&self, user_id: &str, call_id: &str, reason: &str) {
        if let Some(target) = self.presence.by_user(user_id) {
            self.hub.send(
                &target.connection_id,
                ServerMessage::CallEnded {
                    call_id: call_id.to_string(),
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// 迁移到 ENDED 并写审计，返回迁移是否生效
    fn close_session(&self, call_id: &str, acting: &Identity, reason: String) -> bool {
        let Some(session) = self
            .sessions
            .transition_if(call_id, CallEvent::End, |s| s.is_participant(&acting.user_id))
        else {
            return false;
        };

        let duration = session.duration_seconds();
        let was_accepted = session.was_accepted();
        info!(
            "Call {} ended by {} after {:.2}s (accepted: {}, reason: {})",
            call_id,
            acting,
            duration.unwrap_or_default(),
            was_accepted,
            reason
        );
        CALL_EVENTS.with_label_values(&["ended"]).inc();

        let audit = self.audit.clone();
        let data = CallData::new(call_id, session.caller, session.callee)
            .with_reason(Some(reason))
            .with_duration(duration);
        self.tasks
            .spawn(async move { audit.log_ended(data, was_accepted).await });

        self.sessions
            .schedule_eviction(call_id, self.eviction.after_end);
        true
    }

    fn fail(&self, connection_id: &str, message: &str) {
        CALL_EVENTS.with_label_values(&["failed"]).inc();
        self.hub
            .send(connection_id, ServerMessage::call_failed(message));
    }

    /// 取消会话驱逐定时器，并在 `drain_timeout` 内等待进行中的审计写入完成
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.sessions.shutdown();
        self.tasks.close();

        let pending = self.tasks.len();
        if pending > 0 {
            info!("Waiting for {} in-flight audit writes", pending);
        }
        if tokio::time::timeout(drain_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                "{} audit writes still pending after {:?}, abandoning",
                self.tasks.len(),
                drain_timeout
            );
        }
    }
}

fn resolve_reason(reason: Option<&str>, default: &str) -> String {
    reason
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or(default)
        .to_string()
}
