//! 统一配置管理系统
//!
//! 所有配置项的定义、默认值与校验都在这里统一管理。配置文件使用 TOML 格式。

pub mod audit;
pub mod bind;
pub mod directory;
pub mod signaling;
pub mod tracing;

pub use crate::config::audit::{AuditConfig, SinksConfig};
pub use crate::config::bind::BindConfig;
pub use crate::config::directory::{DirectoryConfig, DirectoryUser};
pub use crate::config::signaling::SignalingConfig;
pub use crate::config::tracing::TracingConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// callrelay 主配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CallRelayConfig {
    /// Service enable flags (bitmask)
    ///
    /// Bit positions:
    /// - Bit 0 (1): Signaling gateway (WebSocket + HTTP)
    /// - Bit 1 (2): Accepted-call LogService sink
    /// - Bit 2 (4): Rejected-call LogService sink
    ///
    /// `enable = 7` runs everything in one process, `enable = 1` runs only
    /// the gateway and expects the sinks to be reachable elsewhere.
    #[serde(default = "default_enable")]
    pub enable: u8,

    /// 服务器实例名称
    pub name: String,

    /// 运行环境标识："dev" | "prod" | "test"
    pub env: String,

    /// HTTP/WebSocket 监听配置
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub signaling: SignalingConfig,

    /// 审计日志客户端配置（网关 -> 日志通道）
    #[serde(default)]
    pub audit: AuditConfig,

    /// 内置日志通道服务端配置
    #[serde(default)]
    pub sinks: SinksConfig,

    /// 内存用户目录
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// 可观测性配置（日志 + 追踪）
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别，支持 EnvFilter 语法（如 "info,tower_http=warn"）
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,

    /// OpenTelemetry 追踪配置，需要编译时启用 `opentelemetry` feature
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标："console"（默认）| "file"
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 当 output = "file" 时按天轮转
    #[serde(default)]
    pub rotate: bool,

    /// 当 output = "file" 时的日志目录
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            filter_level: default_filter_level(),
            tracing: TracingConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_enable() -> u8 {
    ENABLE_GATEWAY | ENABLE_ACCEPTED_SINK | ENABLE_REJECTED_SINK
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for CallRelayConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            name: "callrelay-default".to_string(),
            env: "dev".to_string(),
            bind: BindConfig::default(),
            signaling: SignalingConfig::default(),
            audit: AuditConfig::default(),
            sinks: SinksConfig::default(),
            directory: DirectoryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

// 服务启用标志位常量
pub const ENABLE_GATEWAY: u8 = 0b001;
pub const ENABLE_ACCEPTED_SINK: u8 = 0b010;
pub const ENABLE_REJECTED_SINK: u8 = 0b100;

impl CallRelayConfig {
    /// 检查是否启用了信令网关
    pub fn is_gateway_enabled(&self) -> bool {
        self.enable & ENABLE_GATEWAY != 0
    }

    /// 检查是否启用了 AcceptedChannel 日志服务
    pub fn is_accepted_sink_enabled(&self) -> bool {
        self.enable & ENABLE_ACCEPTED_SINK != 0
    }

    /// 检查是否启用了 RejectedChannel 日志服务
    pub fn is_rejected_sink_enabled(&self) -> bool {
        self.enable & ENABLE_REJECTED_SINK != 0
    }

    pub fn tracing_config(&self) -> &TracingConfig {
        &self.observability.tracing
    }

    pub fn observability_config(&self) -> &ObservabilityConfig {
        &self.observability
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.to_path_buf(),
            });
        }

        if !path_ref.is_file() {
            return Err(ConfigError::NotAFile {
                path: path_ref.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        Ok(Self::from_toml(&content)?)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// 验证配置有效性
    ///
    /// 返回发现的全部问题。以 `Warning:` 开头的条目不阻止启动。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.enable > 0b111 {
            errors.push(format!(
                "Invalid enable bitmask value: {}. Must be between 0 and 7 (3 bits)",
                self.enable
            ));
        }
        if self.enable == 0 {
            errors.push("Warning: enable = 0, no service will be started".to_string());
        }

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        // 验证过滤级别（EnvFilter 语法，只检查首个指令）
        {
            let main_level = self
                .observability
                .filter_level
                .split(',')
                .next()
                .unwrap_or("")
                .trim();
            if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
                errors.push(format!(
                    "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                    self.observability.filter_level
                ));
            }
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        errors.extend(self.observability.tracing.validate());

        if self.is_gateway_enabled() {
            if let Err(e) = self.bind.socket_addr() {
                errors.push(e);
            }
            errors.extend(self.signaling.validate());
            errors.extend(self.audit.validate());
            errors.extend(self.directory.validate());
        }

        if self.is_accepted_sink_enabled()
            && let Err(e) = self.sinks.accepted_addr()
        {
            errors.push(e);
        }
        if self.is_rejected_sink_enabled()
            && let Err(e) = self.sinks.rejected_addr()
        {
            errors.push(e);
        }
        if self.is_accepted_sink_enabled()
            && self.is_rejected_sink_enabled()
            && self.sinks.accepted_bind == self.sinks.rejected_bind
        {
            errors.push(format!(
                "sinks.accepted_bind and sinks.rejected_bind cannot share the address {}",
                self.sinks.accepted_bind
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_SECRET: &str = "0123456789abcdef0123456789abcdef-gateway";

    fn valid_config() -> CallRelayConfig {
        let mut config = CallRelayConfig::default();
        config.signaling.jwt_secret = GOOD_SECRET.to_string();
        config.directory.users = vec![
            DirectoryUser {
                id: "u1".to_string(),
                username: "alice".to_string(),
            },
            DirectoryUser {
                id: "u2".to_string(),
                username: "bob".to_string(),
            },
        ];
        config
    }

    fn hard_errors(config: &CallRelayConfig) -> Vec<String> {
        match config.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .into_iter()
                .filter(|e| !e.starts_with("Warning:"))
                .collect(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = CallRelayConfig::default();
        assert_eq!(config.enable, 7);
        assert!(config.is_gateway_enabled());
        assert!(config.is_accepted_sink_enabled());
        assert!(config.is_rejected_sink_enabled());
        assert_eq!(config.signaling.ws_path, "/webrtc");
        assert_eq!(config.signaling.reject_eviction_ms, 5000);
        assert_eq!(config.signaling.end_eviction_ms, 3000);
        assert_eq!(config.audit.accepted_endpoint, "http://127.0.0.1:5002");
        assert_eq!(config.audit.rejected_endpoint, "http://127.0.0.1:5001");
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = CallRelayConfig::from_toml(
            r#"
            name = "edge-1"
            env = "test"

            [signaling]
            jwt_secret = "s3cr3t"

            [[directory.users]]
            id = "u1"
            username = "alice"
        "#,
        )
        .unwrap();

        assert_eq!(config.enable, 7);
        assert_eq!(config.bind.port, 8080);
        assert_eq!(config.signaling.ws_path, "/webrtc");
        assert_eq!(config.signaling.jwt_secret, "s3cr3t");
        assert_eq!(config.directory.users.len(), 1);
        assert_eq!(config.audit.timeout_ms, 3000);
        assert_eq!(config.observability.log.output, "console");
    }

    #[test]
    fn test_toml_serialization() {
        let config = valid_config();
        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("enable = 7"));
        assert!(toml_str.contains("ws_path = \"/webrtc\""));

        let parsed = CallRelayConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.directory.users, config.directory.users);
        assert_eq!(parsed.signaling.jwt_secret, GOOD_SECRET);
    }

    #[test]
    fn test_service_flags() {
        let mut config = CallRelayConfig::default();

        config.enable = ENABLE_GATEWAY;
        assert!(config.is_gateway_enabled());
        assert!(!config.is_accepted_sink_enabled());
        assert!(!config.is_rejected_sink_enabled());

        config.enable = ENABLE_ACCEPTED_SINK | ENABLE_REJECTED_SINK;
        assert!(!config.is_gateway_enabled());
        assert!(config.is_accepted_sink_enabled());
        assert!(config.is_rejected_sink_enabled());
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_jwt_secret_for_gateway() {
        let mut config = valid_config();
        config.signaling.jwt_secret = String::new();
        let errors = hard_errors(&config);
        assert!(errors.iter().any(|e| e.contains("jwt_secret")));

        // Sinks-only deployments don't need the secret
        config.enable = ENABLE_ACCEPTED_SINK | ENABLE_REJECTED_SINK;
        assert!(hard_errors(&config).is_empty());
    }

    #[test]
    fn test_validate_short_secret_is_warning_only() {
        let mut config = valid_config();
        config.signaling.jwt_secret = "short".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().all(|e| e.starts_with("Warning:")));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid_config();
        config.enable = 9;
        config.env = "staging".to_string();
        config.signaling.ws_path = "webrtc".to_string();
        config.audit.rejected_endpoint = "127.0.0.1:5001".to_string();
        config.audit.timeout_ms = 0;
        config.observability.tracing.enable = true;
        config.observability.tracing.sample_ratio = 2.0;

        let errors = hard_errors(&config);
        assert!(errors.iter().any(|e| e.contains("bitmask")));
        assert!(errors.iter().any(|e| e.contains("environment")));
        assert!(errors.iter().any(|e| e.contains("ws_path")));
        assert!(errors.iter().any(|e| e.contains("rejected_endpoint")));
        assert!(errors.iter().any(|e| e.contains("timeout_ms")));
        assert!(errors.iter().any(|e| e.contains("sample_ratio")));
    }

    #[test]
    fn test_validate_duplicate_directory_user() {
        let mut config = valid_config();
        config.directory.users.push(DirectoryUser {
            id: "u1".to_string(),
            username: "alice-2".to_string(),
        });
        let errors = hard_errors(&config);
        assert!(errors.iter().any(|e| e.contains("Duplicate user id")));
    }

    #[test]
    fn test_validate_sink_binds() {
        let mut config = valid_config();
        config.sinks.rejected_bind = config.sinks.accepted_bind.clone();
        assert!(
            hard_errors(&config)
                .iter()
                .any(|e| e.contains("cannot share"))
        );

        config.sinks.rejected_bind = "not-an-address".to_string();
        assert!(
            hard_errors(&config)
                .iter()
                .any(|e| e.contains("sinks.rejected_bind"))
        );
    }

    #[test]
    fn test_validate_tls_requires_domain() {
        let mut config = valid_config();
        config.audit.enable_tls = true;
        assert!(
            hard_errors(&config)
                .iter()
                .any(|e| e.contains("tls_domain"))
        );

        config.audit.tls_domain = Some("logs.internal".to_string());
        config.audit.client_cert = Some("/etc/callrelay/client.crt".to_string());
        assert!(hard_errors(&config).iter().any(|e| e.contains("mTLS")));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            CallRelayConfig::from_file(&missing),
            Err(ConfigError::FileNotFound { .. })
        ));

        assert!(matches!(
            CallRelayConfig::from_file(dir.path()),
            Err(ConfigError::NotAFile { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "name = [unterminated").unwrap();
        assert!(matches!(
            CallRelayConfig::from_file(&broken),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, valid_config().to_toml().unwrap()).unwrap();

        let config = CallRelayConfig::from_file(&path).unwrap();
        assert_eq!(config.name, "callrelay-default");
        assert_eq!(config.directory.users.len(), 2);
    }
}
