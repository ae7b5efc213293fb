//! 呼叫会话表
//!
//! 以 callId 为键保存进行中的呼叫状态机：
//!
//! ```text
//! INITIATED --accept--> ACCEPTED --end--> ENDED
//! INITIATED --reject--> REJECTED
//! INITIATED --end-----> ENDED
//! ```
//!
//! 终态会话不会立即删除，而是在宽限期后由可取消的定时任务驱逐，
//! 以便迟到或重复的终态消息仍能与会话对账。

use crate::clock::Clock;
use crate::error::SessionError;
use crate::types::Identity;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use strum::{AsRefStr, Display};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 呼叫状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Initiated,
    Accepted,
    Rejected,
    Ended,
}

/// 驱动状态迁移的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CallEvent {
    Accept,
    Reject,
    End,
}

impl CallState {
    /// 计算迁移后的状态，非法迁移返回 `None`
    pub fn apply(self, event: CallEvent) -> Option<CallState> {
        match (self, event) {
            (CallState::Initiated, CallEvent::Accept) => Some(CallState::Accepted),
            (CallState::Initiated, CallEvent::Reject) => Some(CallState::Rejected),
            (CallState::Initiated, CallEvent::End) => Some(CallState::Ended),
            (CallState::Accepted, CallEvent::End) => Some(CallState::Ended),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Rejected | CallState::Ended)
    }
}

/// 一次呼叫
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub call_id: String,
    pub caller: Identity,
    pub callee: Identity,
    pub state: CallState,
    pub start_time: DateTime<Utc>,
    pub accept_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.caller.user_id == user_id || self.callee.user_id == user_id
    }

    /// 通话时长（秒），仅在会话结束后有值
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    pub fn was_accepted(&self) -> bool {
        self.accept_time.is_some()
    }

    /// 会话中的另一方，`user_id` 不是参与者时为 `None`
    pub fn counterparty_of(&self, user_id: &str) -> Option<&Identity> {
        if self.caller.user_id == user_id {
            Some(&self.callee)
        } else if self.callee.user_id == user_id {
            Some(&self.caller)
        } else {
            None
        }
    }
}

struct Eviction {
    generation: u64,
    handle: AbortHandle,
}

struct Inner {
    sessions: DashMap<String, CallSession>,
    evictions: DashMap<String, Eviction>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

/// 呼叫会话表
///
/// 克隆开销很小，所有克隆共享同一张表。
#[derive(Clone)]
pub struct CallSessionTable {
    inner: Arc<Inner>,
}

impl CallSessionTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                evictions: DashMap::new(),
                clock,
                shutdown: CancellationToken::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// 创建 INITIATED 状态的会话，callId 已存在时失败
    pub fn create(
        &self,
        call_id: &str,
        caller: Identity,
        callee: Identity,
    ) -> Result<CallSession, SessionError> {
        match self.inner.sessions.entry(call_id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::DuplicateCall(call_id.to_string())),
            Entry::Vacant(vacant) => {
                let session = CallSession {
                    call_id: call_id.to_string(),
                    caller,
                    callee,
                    state: CallState::Initiated,
                    start_time: self.inner.clock.now(),
                    accept_time: None,
                    end_time: None,
                };
                vacant.insert(session.clone());
                debug!("Call session {} created", call_id);
                Ok(session)
            }
        }
    }

    /// 执行状态迁移，返回更新后的会话
    ///
    /// callId 不存在或迁移非法时返回 `None`，会话保持不变。
    pub fn transition(&self, call_id: &str, event: CallEvent) -> Option<CallSession> {
        self.transition_if(call_id, event, |_| true)
    }

    /// 在 `guard` 通过时执行状态迁移
    ///
    /// `guard` 与迁移在同一把分片锁内执行，检查与修改之间不会插入其他事件。
    pub fn transition_if<F>(&self, call_id: &str, event: CallEvent, guard: F) -> Option<CallSession>
    where
        F: FnOnce(&CallSession) -> bool,
    {
        let Some(mut session) = self.inner.sessions.get_mut(call_id) else {
            debug!("Ignoring {} for unknown call {}", event, call_id);
            return None;
        };

        if !guard(&session) {
            debug!(
                "Ignoring {} for call {}: sender is not allowed to act on it",
                event, call_id
            );
            return None;
        }

        let Some(next) = session.state.apply(event) else {
            debug!(
                "Ignoring invalid transition {} --{}--> for call {}",
                session.state, event, call_id
            );
            return None;
        };

        let now = self.inner.clock.now();
        match next {
            CallState::Accepted => session.accept_time = Some(now),
            CallState::Rejected | CallState::Ended => session.end_time = Some(now),
            CallState::Initiated => {}
        }
        session.state = next;

        debug!("Call {} moved to {}", call_id, next);
        Some(session.clone())
    }

    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.inner.sessions.get(call_id).map(|s| s.clone())
    }

    /// `user_id` 参与的所有未终结会话
    pub fn active_for(&self, user_id: &str) -> Vec<CallSession> {
        self.inner
            .sessions
            .iter()
            .filter(|s| !s.state.is_terminal() && s.is_participant(user_id))
            .map(|s| s.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// 待执行的驱逐任务数
    pub fn pending_evictions(&self) -> usize {
        self.inner.evictions.len()
    }

    /// 在 `after` 之后删除会话
    ///
    /// 同一 callId 再次调度会替换之前的定时任务。关闭后调用无效。
    pub fn schedule_eviction(&self, call_id: &str, after: Duration) {
        if self.inner.shutdown.is_cancelled() {
            debug!("Table shut down, not scheduling eviction for {}", call_id);
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let id = call_id.to_string();

        // The entry guard is held until the new eviction is recorded, so the
        // timer task can't observe the slot before it belongs to this generation.
        let slot = self.inner.evictions.entry(call_id.to_string());

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let Some(inner) = weak.upgrade() else { return };
                    let owned = inner
                        .evictions
                        .remove_if(&id, |_, eviction| eviction.generation == generation)
                        .is_some();
                    if owned && inner.sessions.remove(&id).is_some() {
                        debug!("Call session {} evicted", id);
                    }
                }
            }
        });

        let eviction = Eviction {
            generation,
            handle: handle.abort_handle(),
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(eviction);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(eviction);
            }
        }
    }

    /// 取消所有待执行的驱逐任务
    ///
    /// 之后的 `schedule_eviction` 调用不再生效，会话保留到表被丢弃。
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let pending = self.inner.evictions.len();
        self.inner.evictions.retain(|_, eviction| {
            eviction.handle.abort();
            false
        });
        info!(
            "Call session table shut down ({} sessions, {} evictions cancelled)",
            self.inner.sessions.len(),
            pending
        );
    }
}

impl std::fmt::Debug for CallSessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionTable")
            .field("sessions", &self.inner.sessions.len())
            .field("pending_evictions", &self.inner.evictions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
        ))
    }

    fn table_with(clock: Arc<ManualClock>) -> CallSessionTable {
        CallSessionTable::new(clock)
    }

    fn seed(table: &CallSessionTable, call_id: &str) -> CallSession {
        table
            .create(
                call_id,
                Identity::new("u1", "alice"),
                Identity::new("u2", "bob"),
            )
            .unwrap()
    }

    #[test]
    fn state_machine_only_allows_legal_transitions() {
        use CallEvent::*;
        use CallState::*;

        assert_eq!(Initiated.apply(Accept), Some(Accepted));
        assert_eq!(Initiated.apply(Reject), Some(Rejected));
        assert_eq!(Initiated.apply(End), Some(Ended));
        assert_eq!(Accepted.apply(End), Some(Ended));

        assert_eq!(Accepted.apply(Accept), None);
        assert_eq!(Accepted.apply(Reject), None);
        for event in [Accept, Reject, End] {
            assert_eq!(Rejected.apply(event), None);
            assert_eq!(Ended.apply(event), None);
        }
        assert_eq!(Rejected.to_string(), "REJECTED");
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let table = table_with(clock());
        seed(&table, "c1");
        let err = table
            .create("c1", Identity::new("u3", "carol"), Identity::new("u4", "dave"))
            .unwrap_err();
        assert_eq!(err, SessionError::DuplicateCall("c1".to_string()));
        assert_eq!(table.get("c1").unwrap().caller.user_id, "u1");
    }

    #[test]
    fn accept_then_end_records_timestamps() {
        let clock = clock();
        let table = table_with(clock.clone());
        let created = seed(&table, "c1");

        clock.advance(chrono::Duration::seconds(2));
        let accepted = table.transition("c1", CallEvent::Accept).unwrap();
        assert_eq!(accepted.state, CallState::Accepted);
        assert_eq!(
            accepted.accept_time,
            Some(created.start_time + chrono::Duration::seconds(2))
        );
        assert!(accepted.end_time.is_none());

        clock.advance(chrono::Duration::milliseconds(10_340));
        let ended = table.transition("c1", CallEvent::End).unwrap();
        assert_eq!(ended.state, CallState::Ended);
        assert!(ended.was_accepted());
        assert_eq!(ended.duration_seconds(), Some(12.34));
    }

    #[test]
    fn invalid_or_unknown_transitions_leave_record_unchanged() {
        let table = table_with(clock());
        seed(&table, "c1");
        let rejected = table.transition("c1", CallEvent::Reject).unwrap();

        assert!(table.transition("c1", CallEvent::Accept).is_none());
        assert!(table.transition("c1", CallEvent::End).is_none());
        assert!(table.transition("missing", CallEvent::End).is_none());
        assert_eq!(table.get("c1").unwrap(), rejected);
    }

    #[test]
    fn guard_failure_is_a_no_op() {
        let table = table_with(clock());
        let created = seed(&table, "c1");

        let result = table.transition_if("c1", CallEvent::Accept, |s| s.callee.user_id == "u9");
        assert!(result.is_none());
        assert_eq!(table.get("c1").unwrap(), created);
    }

    #[test]
    fn active_for_skips_terminal_and_foreign_calls() {
        let table = table_with(clock());
        seed(&table, "c1");
        seed(&table, "c2");
        table.transition("c2", CallEvent::Accept);
        seed(&table, "c3");
        table.transition("c3", CallEvent::Reject);
        table
            .create("c4", Identity::new("u3", "carol"), Identity::new("u4", "dave"))
            .unwrap();

        let mut active: Vec<_> = table
            .active_for("u2")
            .into_iter()
            .map(|s| s.call_id)
            .collect();
        active.sort();
        assert_eq!(active, vec!["c1", "c2"]);
        assert!(table.active_for("u9").is_empty());

        let session = table.get("c1").unwrap();
        assert_eq!(session.counterparty_of("u1").unwrap().user_id, "u2");
        assert_eq!(session.counterparty_of("u2").unwrap().user_id, "u1");
        assert!(session.counterparty_of("u3").is_none());
    }

    #[test]
    fn accept_reject_race_has_single_winner() {
        let table = table_with(clock());
        seed(&table, "c1");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                std::thread::spawn(move || {
                    let event = if i % 2 == 0 {
                        CallEvent::Accept
                    } else {
                        CallEvent::Reject
                    };
                    table.transition("c1", event).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|applied| *applied)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_removes_session_after_grace_period() {
        let table = table_with(clock());
        seed(&table, "c1");
        table.transition("c1", CallEvent::Reject);
        table.schedule_eviction("c1", Duration::from_secs(5));
        assert_eq!(table.pending_evictions(), 1);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(table.get("c1").is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(table.get("c1").is_none());
        assert_eq!(table.pending_evictions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let table = table_with(clock());
        seed(&table, "c1");
        table.schedule_eviction("c1", Duration::from_secs(1));
        table.schedule_eviction("c1", Duration::from_secs(10));
        assert_eq!(table.pending_evictions(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(table.get("c1").is_some());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(table.get("c1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_evictions() {
        let table = table_with(clock());
        seed(&table, "c1");
        seed(&table, "c2");
        table.schedule_eviction("c1", Duration::from_secs(3));
        table.shutdown();
        table.schedule_eviction("c2", Duration::from_secs(3));

        assert_eq!(table.pending_evictions(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(table.len(), 2);
    }
}
