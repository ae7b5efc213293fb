//! Signaling 网关配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Signaling 网关配置
///
/// Service enable/disable is controlled by the bitmask in CallRelayConfig.enable.
/// The ENABLE_GATEWAY bit (bit 0) must be set to enable this service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalingConfig {
    /// WebSocket 路径
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// HS256 JWT 校验密钥（与令牌签发方共享）
    #[serde(default)]
    pub jwt_secret: String,

    /// 呼叫被拒绝后会话保留时长（毫秒）
    #[serde(default = "default_reject_eviction_ms")]
    pub reject_eviction_ms: u64,

    /// 呼叫结束后会话保留时长（毫秒）
    #[serde(default = "default_end_eviction_ms")]
    pub end_eviction_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            jwt_secret: String::new(),
            reject_eviction_ms: default_reject_eviction_ms(),
            end_eviction_ms: default_end_eviction_ms(),
        }
    }
}

impl SignalingConfig {
    pub fn reject_eviction(&self) -> Duration {
        Duration::from_millis(self.reject_eviction_ms)
    }

    pub fn end_eviction(&self) -> Duration {
        Duration::from_millis(self.end_eviction_ms)
    }

    /// 校验网关配置，返回发现的所有问题
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.ws_path.starts_with('/') {
            errors.push(format!(
                "signaling.ws_path '{}' must start with '/'",
                self.ws_path
            ));
        }
        if ["/health", "/metrics"].contains(&self.ws_path.as_str()) {
            errors.push(format!(
                "signaling.ws_path '{}' collides with a built-in endpoint",
                self.ws_path
            ));
        }

        if self.jwt_secret.trim().is_empty() {
            errors.push("signaling.jwt_secret is required when the gateway is enabled".to_string());
        } else {
            if self.jwt_secret.len() < 32 {
                errors.push(
                    "Warning: signaling.jwt_secret is shorter than 32 bytes, HS256 keys should be at least 256 bits"
                        .to_string(),
                );
            }
            if self.jwt_secret.contains("change") || self.jwt_secret.contains("default") {
                errors.push(
                    "Warning: signaling.jwt_secret appears to be a placeholder value. Please change it!"
                        .to_string(),
                );
            }
        }

        errors
    }
}

fn default_ws_path() -> String {
    "/webrtc".to_string()
}

fn default_reject_eviction_ms() -> u64 {
    5000
}

fn default_end_eviction_ms() -> u64 {
    3000
}
