//! 外部用户目录
//!
//! 认证成功后用它确认用户存在，并维护用户的在线标记。

use crate::error::DirectoryError;
use crate::types::Identity;
use async_trait::async_trait;
use callrelay_common::config::DirectoryConfig;
use dashmap::DashMap;
use tracing::debug;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>, DirectoryError>;

    async fn set_online(&self, user_id: &str, online: bool) -> Result<(), DirectoryError>;
}

#[derive(Debug, Clone)]
struct DirectoryRecord {
    username: String,
    online: bool,
}

/// 内存用户目录，用配置中的 `[[directory.users]]` 初始化
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, DirectoryRecord>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let directory = Self::new();
        for user in &config.users {
            directory.insert(Identity::new(&user.id, &user.username));
        }
        directory
    }

    pub fn insert(&self, identity: Identity) {
        self.users.insert(
            identity.user_id,
            DirectoryRecord {
                username: identity.username,
                online: false,
            },
        );
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|record| record.online)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>, DirectoryError> {
        Ok(self
            .users
            .get(user_id)
            .map(|record| Identity::new(user_id, &record.username)))
    }

    async fn set_online(&self, user_id: &str, online: bool) -> Result<(), DirectoryError> {
        match self.users.get_mut(user_id) {
            Some(mut record) => {
                record.online = online;
                debug!("User {} online = {}", user_id, online);
                Ok(())
            }
            None => Err(DirectoryError::Unavailable(format!(
                "user {user_id} is not in the directory"
            ))),
        }
    }
}
