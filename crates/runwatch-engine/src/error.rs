use runwatch_core::ClientError;

/// Failures that abort a run before the agent gets to work.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("client start failed: {0}")]
    ClientStart(#[source] ClientError),

    #[error("session creation failed: {0}")]
    SessionCreate(#[source] ClientError),

    #[error("prompt submission failed: {0}")]
    PromptSend(#[source] ClientError),
}

impl RunError {
    /// Boundary operation that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::ClientStart(_) => "start",
            Self::SessionCreate(_) => "create_session",
            Self::PromptSend(_) => "send",
        }
    }

    pub fn client_error(&self) -> &ClientError {
        match self {
            Self::ClientStart(e) | Self::SessionCreate(e) | Self::PromptSend(e) => e,
        }
    }
}
