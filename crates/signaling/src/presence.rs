//! 在线状态表
//!
//! 维护连接 id 与用户身份之间的双向索引。
//!
//! # 不变量
//! - 每个 connection_id 至多一条记录
//! - 每个 user_id 至多一条活跃记录：同一用户重新连接时，旧记录先被驱逐再插入新记录
//!
//! # 锁顺序
//! 只有 [`PresenceRegistry::add`] 会同时持有两张表的分片锁，顺序固定为 `by_user` -> `by_connection`。

use crate::clock::Clock;
use crate::types::Identity;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info};

/// 一条在线记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub connection_id: String,
    pub identity: Identity,
    pub connected_at: DateTime<Utc>,
}

/// 在线状态表
pub struct PresenceRegistry {
    /// connection_id -> entry
    by_connection: DashMap<String, PresenceEntry>,
    /// user_id -> connection_id
    by_user: DashMap<String, String>,
    clock: Arc<dyn Clock>,
}

impl PresenceRegistry {
    /// `clock` 决定 `connected_at`，与会话表和审计共用同一时钟
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            by_connection: DashMap::new(),
            by_user: DashMap::new(),
            clock,
        }
    }

    /// 注册连接
    ///
    /// 如果该用户已有活跃连接，旧记录被移除并返回，调用方负责断开旧连接。
    pub fn add(&self, connection_id: &str, identity: Identity) -> Option<PresenceEntry> {
        self.add_at(connection_id, identity, self.clock.now())
    }

    pub fn add_at(
        &self,
        connection_id: &str,
        identity: Identity,
        connected_at: DateTime<Utc>,
    ) -> Option<PresenceEntry> {
        // The same connection re-registering under a different user must not leave a dangling index
        if let Some(previous) = self.by_connection(connection_id)
            && previous.identity.user_id != identity.user_id
        {
            self.remove(connection_id);
        }

        let user_id = identity.user_id.clone();
        let entry = PresenceEntry {
            connection_id: connection_id.to_string(),
            identity,
            connected_at,
        };

        match self.by_user.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                let previous_connection = occupied.insert(connection_id.to_string());
                let evicted = if previous_connection != connection_id {
                    self.by_connection
                        .remove(&previous_connection)
                        .map(|(_, evicted)| evicted)
                } else {
                    None
                };
                self.by_connection.insert(connection_id.to_string(), entry);

                if let Some(evicted) = &evicted {
                    info!(
                        "User {} reconnected, superseding connection {} with {}",
                        evicted.identity, evicted.connection_id, connection_id
                    );
                }
                evicted
            }
            Entry::Vacant(vacant) => {
                vacant.insert(connection_id.to_string());
                self.by_connection.insert(connection_id.to_string(), entry);
                debug!("Presence added for connection {}", connection_id);
                None
            }
        }
    }

    /// 注销连接，返回被移除的记录
    ///
    /// 重复调用或对已被驱逐的连接调用都返回 `None`。
    pub fn remove(&self, connection_id: &str) -> Option<PresenceEntry> {
        let (_, entry) = self.by_connection.remove(connection_id)?;
        self.by_user
            .remove_if(&entry.identity.user_id, |_, current| current == connection_id);
        debug!("Presence removed for connection {}", connection_id);
        Some(entry)
    }

    pub fn by_connection(&self, connection_id: &str) -> Option<PresenceEntry> {
        self.by_connection
            .get(connection_id)
            .map(|entry| entry.clone())
    }

    pub fn by_user(&self, user_id: &str) -> Option<PresenceEntry> {
        let connection_id = self.by_user.get(user_id)?.value().clone();
        self.by_connection(&connection_id)
    }

    /// 所有在线记录，按连接时间排序
    pub fn all(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self
            .by_connection
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.identity.user_id.cmp(&b.identity.user_id))
        });
        entries
    }

    /// 在线用户列表（用于 presence 广播）
    pub fn online_users(&self) -> Vec<Identity> {
        self.all().into_iter().map(|entry| entry.identity).collect()
    }

    pub fn count(&self) -> usize {
        self.by_connection.len()
    }
}

impl std::fmt::Debug for PresenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceRegistry")
            .field("connections", &self.by_connection.len())
            .field("users", &self.by_user.len())
            .finish()
    }
}
