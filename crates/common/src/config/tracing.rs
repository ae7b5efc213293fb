//! `[observability.tracing]`：OTLP span 导出
//!
//! 只有以 `opentelemetry` feature 编译时才生效；未编译该 feature 时配置照常解析和校验，
//! 但不会导出任何 span。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub enable: bool,

    /// 上报的 `service.name`，同一部署的多个实例应保持一致
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP/gRPC collector 地址
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// 根 span 采样比例，0.0 ~ 1.0；有上游 traceparent 时跟随上游决定
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,
}

fn default_service_name() -> String {
    "callrelay".to_string()
}

fn default_endpoint() -> String {
    "http://127.0.0.1:4317".to_string()
}

fn default_sample_ratio() -> f64 {
    1.0
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enable: false,
            service_name: default_service_name(),
            endpoint: default_endpoint(),
            sample_ratio: default_sample_ratio(),
        }
    }
}

impl TracingConfig {
    /// 未启用时不做任何检查
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.enable {
            return errors;
        }

        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            errors.push(format!(
                "observability.tracing.endpoint '{}' must start with http:// or https://",
                self.endpoint
            ));
        }
        if self.service_name.trim().is_empty() {
            errors.push("observability.tracing.service_name cannot be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            errors.push(format!(
                "observability.tracing.sample_ratio {} must be within 0.0..=1.0",
                self.sample_ratio
            ));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_section_is_never_rejected() {
        let config = TracingConfig {
            endpoint: String::new(),
            service_name: String::new(),
            sample_ratio: 7.0,
            ..TracingConfig::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn enabled_section_reports_every_bad_field() {
        let config = TracingConfig {
            enable: true,
            endpoint: "collector:4317".to_string(),
            service_name: " ".to_string(),
            sample_ratio: -0.5,
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("observability.tracing.endpoint"));
        assert!(errors[2].contains("sample_ratio"));

        let config = TracingConfig {
            enable: true,
            endpoint: "https://tempo.internal:4317".to_string(),
            sample_ratio: 0.25,
            ..TracingConfig::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn omitted_fields_fall_back_to_local_collector() {
        let config: TracingConfig = toml::from_str("enable = true").unwrap();
        assert_eq!(config.service_name, "callrelay");
        assert_eq!(config.endpoint, "http://127.0.0.1:4317");
        assert_eq!(config.sample_ratio, 1.0);
    }
}
