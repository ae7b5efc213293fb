//! 审计日志配置
//!
//! `[audit]` 是网关访问两个日志通道的客户端配置，
//! `[sinks]` 是本进程内置的两个 LogService 服务端的监听配置。

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// 审计日志客户端配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    /// AcceptedChannel gRPC 地址
    #[serde(default = "default_accepted_endpoint")]
    pub accepted_endpoint: String,

    /// RejectedChannel gRPC 地址
    #[serde(default = "default_rejected_endpoint")]
    pub rejected_endpoint: String,

    /// 单次 LogCall 超时（毫秒），超时视为写入失败
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// 建立连接超时（毫秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// 是否启用 TLS
    #[serde(default)]
    pub enable_tls: bool,

    /// TLS 域名（启用 TLS 时必需）
    pub tls_domain: Option<String>,

    /// CA 证书路径（用于验证服务端）
    pub ca_cert: Option<String>,

    /// 客户端证书路径（mTLS）
    pub client_cert: Option<String>,

    /// 客户端私钥路径（mTLS）
    pub client_key: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            accepted_endpoint: default_accepted_endpoint(),
            rejected_endpoint: default_rejected_endpoint(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            enable_tls: false,
            tls_domain: None,
            ca_cert: None,
            client_cert: None,
            client_key: None,
        }
    }
}

impl AuditConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (field, endpoint) in [
            ("audit.accepted_endpoint", &self.accepted_endpoint),
            ("audit.rejected_endpoint", &self.rejected_endpoint),
        ] {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(format!(
                    "{field} '{endpoint}' must start with http:// or https://"
                ));
            }
        }

        if self.accepted_endpoint == self.rejected_endpoint {
            errors.push(
                "Warning: audit.accepted_endpoint and audit.rejected_endpoint are identical, fallback writes will hit the same sink"
                    .to_string(),
            );
        }

        if self.timeout_ms == 0 {
            errors.push("audit.timeout_ms must be greater than 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            errors.push("audit.connect_timeout_ms must be greater than 0".to_string());
        }

        if self.enable_tls
            && self
                .tls_domain
                .as_deref()
                .is_none_or(|domain| domain.trim().is_empty())
        {
            errors.push("audit.tls_domain is required when audit.enable_tls is true".to_string());
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            errors.push(
                "audit.client_cert and audit.client_key must be provided together for mTLS"
                    .to_string(),
            );
        }

        errors
    }
}

/// 内置 LogService 服务端监听配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SinksConfig {
    #[serde(default = "default_accepted_bind")]
    pub accepted_bind: String,

    #[serde(default = "default_rejected_bind")]
    pub rejected_bind: String,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            accepted_bind: default_accepted_bind(),
            rejected_bind: default_rejected_bind(),
        }
    }
}

impl SinksConfig {
    pub fn accepted_addr(&self) -> Result<SocketAddr, String> {
        parse_bind("sinks.accepted_bind", &self.accepted_bind)
    }

    pub fn rejected_addr(&self) -> Result<SocketAddr, String> {
        parse_bind("sinks.rejected_bind", &self.rejected_bind)
    }
}

fn parse_bind(field: &str, value: &str) -> Result<SocketAddr, String> {
    value
        .parse()
        .map_err(|e| format!("Invalid {field} '{value}': {e}"))
}

fn default_accepted_endpoint() -> String {
    "http://127.0.0.1:5002".to_string()
}

fn default_rejected_endpoint() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_accepted_bind() -> String {
    "127.0.0.1:5002".to_string()
}

fn default_rejected_bind() -> String {
    "127.0.0.1:5001".to_string()
}
