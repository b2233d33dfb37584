use std::time::Duration;

/// Errors raised at the agent runtime boundary.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to launch runtime: {0}")]
    Spawn(String),
    #[error("client not started")]
    NotStarted,
    #[error("runtime disconnected")]
    Disconnected,
    #[error("request {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("runtime error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("session error: {0}")]
    Session(String),
}

impl ClientError {
    /// Short classification string for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn",
            Self::NotStarted => "not_started",
            Self::Disconnected => "disconnected",
            Self::Timeout { .. } => "timeout",
            Self::Rpc { .. } => "rpc",
            Self::Protocol(_) => "protocol",
            Self::Session(_) => "session",
        }
    }

    /// Whether the connection to the runtime is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::NotStarted)
    }
}
