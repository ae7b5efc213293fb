//! LogSink 服务错误定义

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogSinkError {
    /// 监听地址绑定失败
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// gRPC 服务运行错误
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

pub type Result<T> = std::result::Result<T, LogSinkError>;
