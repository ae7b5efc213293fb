//! 内存用户目录配置

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 用户目录种子数据
///
/// 网关只负责校验令牌，用户信息由外部目录提供。内置实现从这里加载。
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
}

/// 单个用户条目
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: String,
    pub username: String,
}

impl DirectoryConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.users.is_empty() {
            errors.push(
                "Warning: directory.users is empty, every connection will fail authentication"
                    .to_string(),
            );
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.id.trim().is_empty() {
                errors.push(format!(
                    "directory.users entry '{}' has an empty id",
                    user.username
                ));
            } else if !seen.insert(user.id.as_str()) {
                errors.push(format!("Duplicate user id in directory.users: {}", user.id));
            }
        }

        errors
    }
}
