//! Error types for the load testing engine.
//!
//! Defines [`ConfigError`] for configuration and setup validation,
//! [`RpcError`] for master/worker transport failures, and [`ExecutionError`]
//! for scheduling faults. [`StressError`] unifies them at the public entry
//! points.

use uuid::Uuid;

use crate::domain::CommandStatus;

/// Errors that occur during configuration parsing, validation, or file I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure -- the config parsed successfully but
    /// contains invalid values (e.g., a plan without rounds).
    #[error("Config validation error: {message}")]
    Validation { message: String },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },
}

impl ConfigError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Transport errors raised while talking to a remote node.
///
/// Per-node failures are caught by the scatter-gather callers and never
/// abort a cluster-wide query.
#[derive(Debug, thiserror::Error, Clone)]
pub enum RpcError {
    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("connection to {node} failed: {message}")]
    Connection { node: String, message: String },

    /// The request exceeded the client timeout.
    #[error("request to {node} timed out")]
    Timeout { node: String },

    /// The remote node answered with a non-success HTTP status.
    #[error("{node} answered HTTP {status}: {body}")]
    Status {
        node: String,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response from {node}: {message}")]
    Decode { node: String, message: String },

    /// The remote node does not know the requested entity.
    #[error("entity not found: {name}")]
    NotFound { name: String },

    /// The call was abandoned because the run was cancelled.
    #[error("rpc cancelled")]
    Cancelled,
}

impl RpcError {
    /// Returns `true` if the failure is worth retrying with backoff.
    ///
    /// Connection failures, timeouts and gateway-style statuses (502, 503,
    /// 504) are transient; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => matches!(status, 502..=504),
            Self::Decode { .. } | Self::NotFound { .. } | Self::Cancelled => false,
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`RpcError`] variant.
    pub fn classify_reqwest(node: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                node: node.to_string(),
            }
        } else if err.is_decode() {
            Self::Decode {
                node: node.to_string(),
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                node: node.to_string(),
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Connection {
                node: node.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Faults raised by the scheduler and executors.
///
/// These are programming or setup errors and are surfaced immediately
/// rather than swallowed.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A command was handed to the scheduler in a state other than `Scheduled`.
    #[error("command {command_id} cannot run from status {status}")]
    InvalidCommandState {
        command_id: Uuid,
        status: CommandStatus,
    },

    /// A command status transition that the state machine rejects.
    #[error("invalid transition from {from} to {to} for command {command_id}")]
    InvalidTransition {
        command_id: Uuid,
        from: CommandStatus,
        to: CommandStatus,
    },

    /// The resolved request could not be turned into an HTTP request.
    #[error("failed to build request for iteration '{iteration}': {message}")]
    RequestBuild { iteration: String, message: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    ClientBuild { message: String },

    /// The plan contains no valid round to execute.
    #[error("plan '{plan}' has no valid rounds")]
    NothingToRun { plan: String },
}

/// Top-level error for the engine's public entry points.
#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Socket or file I/O outside config loading (listeners, reports).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
