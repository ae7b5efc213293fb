use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// HTTP/WebSocket 监听配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BindConfig {
    /// 绑定 IP 地址
    ///
    /// 通常使用 "0.0.0.0" 监听所有接口。
    #[serde(default = "default_bind_ip")]
    pub ip: String,

    /// 绑定端口
    #[serde(default = "default_bind_port")]
    pub port: u16,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            ip: default_bind_ip(),
            port: default_bind_port(),
        }
    }
}

impl BindConfig {
    /// 解析为监听地址
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.ip, self.port)
            .parse()
            .map_err(|e| format!("Invalid bind address '{}:{}': {e}", self.ip, self.port))
    }
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}
