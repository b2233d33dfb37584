use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{SessionId, ToolCallId};

/// Per-call information handed to [`Tool::execute`].
pub struct ToolContext {
    pub session_id: SessionId,
    pub tool_call_id: ToolCallId,
    pub abort_signal: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId, tool_call_id: ToolCallId) -> Self {
        Self {
            session_id,
            tool_call_id,
            abort_signal: CancellationToken::new(),
        }
    }

    /// Tie the call to a token the host cancels when the session goes away.
    pub fn with_abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = token;
        self
    }
}

/// Result returned by a tool execution.
///
/// `content` is always plain text: the host tool-calling protocol only
/// carries strings back to the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ToolResult {
    pub fn text(content: impl Into<String>, duration: Duration) -> Self {
        Self::finished(content.into(), false, duration)
    }

    /// A result the agent should read as a failure. The call itself worked.
    pub fn error(content: impl Into<String>, duration: Duration) -> Self {
        Self::finished(content.into(), true, duration)
    }

    fn finished(content: String, is_error: bool, duration: Duration) -> Self {
        Self {
            content,
            is_error,
            duration,
        }
    }
}

/// What the runtime is told about a tool when a session is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// A function the agent may call through the runtime.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the call. Return `Err` only when the call could not be carried
    /// out at all; domain failures belong in [`ToolResult::error`].
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Durations on the wire and in reports are whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "required": ["text"]})
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            let text = args["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
            Ok(ToolResult::text(text, Duration::ZERO))
        }
    }

    #[test]
    fn definition_from_tool() {
        let def = EchoTool.to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn execute_reports_invalid_arguments() {
        let ctx = ToolContext::new(SessionId::new(), ToolCallId::new());
        let err = EchoTool.execute(serde_json::json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid arguments: text is required");
    }

    #[test]
    fn tool_result_duration_serializes_as_ms() {
        let result = ToolResult::text("ok", Duration::from_millis(1234));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1234);
        assert_eq!(json["is_error"], false);

        let parsed: ToolResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.duration, Duration::from_millis(1234));
    }

    #[test]
    fn error_result_is_flagged() {
        let result = ToolResult::error("nope", Duration::ZERO);
        assert!(result.is_error);
        assert_eq!(result.content, "nope");
    }
}
