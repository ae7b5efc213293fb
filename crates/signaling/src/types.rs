use serde::{Deserialize, Serialize};

/// 已认证用户身份，连接生命周期内不可变
///
/// 序列化为 `{"userId": .., "username": ..}`，同时用作 `onlineUsers` 列表元素。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.username, self.user_id)
    }
}
