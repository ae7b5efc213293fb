//! LogService gRPC 客户端

use super::{AuditSink, LogAck, LogRecord};
use crate::error::AuditError;
use async_trait::async_trait;
use callrelay_common::config::AuditConfig;
use callrelay_proto::LogServiceClient;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info};

/// 通过 gRPC 写入一个日志通道
///
/// 连接是惰性建立的，通道不可达不会阻止网关启动，只会让对应的写入失败。
#[derive(Debug, Clone)]
pub struct GrpcAuditSink {
    endpoint: String,
    client: LogServiceClient<Channel>,
}

impl GrpcAuditSink {
    pub fn connect_lazy(endpoint: &str, config: &AuditConfig) -> Result<Self, AuditError> {
        let mut channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| AuditError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout());

        if config.enable_tls {
            let tls_config = Self::build_tls_config(config)?;
            channel = channel
                .tls_config(tls_config)
                .map_err(|e| AuditError::Tls(e.to_string()))?;
            info!("TLS enabled for audit channel {}", endpoint);
        }

        let client = LogServiceClient::new(channel.connect_lazy());
        debug!("Audit channel {} configured", endpoint);

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_tls_config(config: &AuditConfig) -> Result<ClientTlsConfig, AuditError> {
        let tls_domain = config.tls_domain.as_ref().ok_or_else(|| {
            AuditError::Tls("tls_domain is required when enable_tls is true".to_string())
        })?;

        let mut tls_config = ClientTlsConfig::new().domain_name(tls_domain);

        if let Some(ca_cert_path) = &config.ca_cert {
            let ca_cert_pem = std::fs::read(ca_cert_path).map_err(|e| {
                AuditError::Tls(format!(
                    "Failed to read CA certificate from {ca_cert_path}: {e}"
                ))
            })?;
            tls_config = tls_config.ca_certificate(Certificate::from_pem(ca_cert_pem));
        }

        match (&config.client_cert, &config.client_key) {
            (Some(cert_path), Some(key_path)) => {
                let cert_pem = std::fs::read(cert_path).map_err(|e| {
                    AuditError::Tls(format!(
                        "Failed to read client certificate from {cert_path}: {e}"
                    ))
                })?;
                let key_pem = std::fs::read(key_path).map_err(|e| {
                    AuditError::Tls(format!(
                        "Failed to read client private key from {key_path}: {e}"
                    ))
                })?;
                tls_config = tls_config.identity(Identity::from_pem(cert_pem, key_pem));
                info!("mTLS enabled for audit channels");
            }
            (None, None) => {}
            _ => {
                return Err(AuditError::Tls(
                    "Both client_cert and client_key must be provided for mTLS".to_string(),
                ));
            }
        }

        Ok(tls_config)
    }
}

#[async_trait]
impl AuditSink for GrpcAuditSink {
    async fn log_call(&self, record: &LogRecord) -> Result<LogAck, AuditError> {
        // Channel 内部复用连接，克隆客户端即可并发调用
        let mut client = self.client.clone();
        let response = client
            .log_call(tonic::Request::new(record.to_request()))
            .await?
            .into_inner();

        Ok(LogAck {
            success: response.success,
            message: response.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_endpoint() {
        let err = GrpcAuditSink::connect_lazy("not a uri", &AuditConfig::default()).unwrap_err();
        assert!(matches!(err, AuditError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    async fn tls_requires_domain() {
        let config = AuditConfig {
            enable_tls: true,
            ..AuditConfig::default()
        };
        let err = GrpcAuditSink::connect_lazy("https://127.0.0.1:5002", &config).unwrap_err();
        assert!(matches!(err, AuditError::Tls(_)));
    }

    #[tokio::test]
    async fn unreachable_sink_fails_the_write() {
        let config = AuditConfig {
            connect_timeout_ms: 200,
            timeout_ms: 500,
            ..AuditConfig::default()
        };
        // Port 9 (discard) is not expected to run a gRPC server
        let sink = GrpcAuditSink::connect_lazy("http://127.0.0.1:9", &config).unwrap();
        assert_eq!(sink.endpoint(), "http://127.0.0.1:9");

        let record = LogRecord {
            call_id: "c1".to_string(),
            caller_id: "u1".to_string(),
            caller_username: "alice".to_string(),
            callee_id: "u2".to_string(),
            callee_username: "bob".to_string(),
            action: super::super::CallAction::CallInitiated,
            timestamp: chrono::Utc::now(),
            duration_seconds: None,
            reason: "Call initiated".to_string(),
        };
        assert!(matches!(
            sink.log_call(&record).await,
            Err(AuditError::Rpc(_))
        ));
    }
}
