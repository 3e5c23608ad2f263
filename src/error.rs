// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replay extension.
//!
//! Errors are categorized by where they occur. None of them ever reach the
//! statement that triggered a broadcast: replication problems surface only
//! through logs and metrics.
//!
//! # Error Categories
//!
//! | Error Type | Scope | Description |
//! |------------|-------|-------------|
//! | `Registry` | Registry | SQLite errors in the target store |
//! | `RegistryUnavailable` | Registry | Store could not be reached at all |
//! | `Config` | Setup | Configuration invalid |
//! | `NodeConnection` | Per node | Node unreachable or connection dropped |
//! | `RemoteExecution` | Per node | Node accepted the connection, statement failed |
//! | `Timeout` | Per node | Configured connect/statement timeout elapsed |
//! | `Runtime` | Setup | Session runtime could not be built |
//! | `Internal` | Any | Unexpected internal error |
//!
//! Phase failures raised by the host engine are not represented here. They use
//! the host's own error type and pass through the interception pipeline as-is.

use thiserror::Error;

/// Result type alias for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Errors that can occur while managing targets or replaying statements.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// SQLite error in the target registry.
    ///
    /// Occurs when reading or writing `replay_targets` rows.
    #[error("Registry error: {0}")]
    Registry(#[from] sqlx::Error),

    /// The registry could not be reached.
    ///
    /// The loader treats this as "zero targets" and logs a warning.
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not establish (or lost) the connection to a target node.
    #[error("Node connection error ({node_id}): {message}")]
    NodeConnection { node_id: i64, message: String },

    /// The node accepted the connection but the statement failed there.
    #[error("Remote execution error ({node_id}): {message}")]
    RemoteExecution { node_id: i64, message: String },

    /// A configured timeout elapsed while talking to a node.
    #[error("Timeout ({node_id}) during {operation}")]
    Timeout { node_id: i64, operation: String },

    /// The per-session async runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplayError {
    /// Short label used for the `error_type` metric dimension.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Registry(_) => "registry",
            Self::RegistryUnavailable(_) => "registry_unavailable",
            Self::Config(_) => "config",
            Self::NodeConnection { .. } => "node_connection",
            Self::RemoteExecution { .. } => "remote_execution",
            Self::Timeout { .. } => "timeout",
            Self::Runtime(_) => "runtime",
            Self::Internal(_) => "internal",
        }
    }

    /// The target node this error is attributed to, if any.
    pub fn node_id(&self) -> Option<i64> {
        match self {
            Self::NodeConnection { node_id, .. }
            | Self::RemoteExecution { node_id, .. }
            | Self::Timeout { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}
