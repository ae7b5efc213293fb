//! callrelay Protocol Buffer Definitions
//!
//! This crate contains the gRPC contract used between the signaling gateway
//! and its two audit log sinks.
//!
//! # Modules
//!
//! - [`logs::v1`]: `LogService` definitions (gateway calls the sinks)
//!
//! # Usage
//!
//! ```ignore
//! use callrelay_proto::{LogCallRequest, LogServiceClient};
//! ```

/// Audit log protocol definitions.
///
/// Contains the `LogService` used by both the accepted-call and the
/// rejected-call sink.
pub mod logs {
    pub mod v1 {
        tonic::include_proto!("logs.v1");
    }
}

// ============================================================================
// Re-exports: LogService
// ============================================================================

pub use logs::v1::{
    LogCallRequest,
    LogCallResponse,
    // Client and server
    log_service_client::LogServiceClient,
    log_service_server::{LogService, LogServiceServer},
};
