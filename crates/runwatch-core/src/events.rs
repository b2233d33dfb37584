use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ToolCallId;

/// An event exactly as the agent runtime delivers it: a type string and an
/// opaque payload whose shape depends on the type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Closed vocabulary of event kinds the orchestrator reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageDelta,
    ToolInvocationStarted,
    ToolInvocationCompleted,
    TurnCompleted,
    SessionIdle,
    Error,
    Other,
}

impl EventKind {
    /// Classify a runtime event type.
    ///
    /// Known runtime names match exactly; anything else falls back to a
    /// case-insensitive substring match and finally to `Other`.
    pub fn classify(event_type: &str) -> Self {
        match event_type {
            "assistant.message_delta" => return Self::MessageDelta,
            "tool.execution_start" => return Self::ToolInvocationStarted,
            "tool.execution_complete" => return Self::ToolInvocationCompleted,
            "assistant.turn_end" => return Self::TurnCompleted,
            "session.idle" => return Self::SessionIdle,
            "session.error" => return Self::Error,
            _ => {}
        }

        let normalized: String = event_type
            .chars()
            .map(|c| match c {
                '.' | '-' | ' ' | '/' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        let has = |needle: &str| normalized.contains(needle);

        if has("tool") {
            if has("partial") || has("progress") {
                return Self::Other;
            }
            if has("start") || has("invok") || has("begin") {
                return Self::ToolInvocationStarted;
            }
            if has("complete")
                || has("_end")
                || normalized.ends_with("end")
                || has("finish")
                || has("result")
            {
                return Self::ToolInvocationCompleted;
            }
        }
        if has("turn_end") || has("turn_complete") || has("turn_done") || has("turn_finish") {
            return Self::TurnCompleted;
        }
        if has("idle") {
            return Self::SessionIdle;
        }
        if has("error") || has("fail") {
            return Self::Error;
        }
        if has("delta") {
            return Self::MessageDelta;
        }
        Self::Other
    }

    /// Kinds that mean the agent finished its current unit of work.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ToolInvocationCompleted | Self::TurnCompleted | Self::SessionIdle
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageDelta => "message_delta",
            Self::ToolInvocationStarted => "tool_invocation_started",
            Self::ToolInvocationCompleted => "tool_invocation_completed",
            Self::TurnCompleted => "turn_completed",
            Self::SessionIdle => "session_idle",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified session event. The payload shape is fixed by the variant.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    MessageDelta {
        content: String,
    },
    ToolInvocationStarted {
        tool_name: Option<String>,
        tool_call_id: Option<ToolCallId>,
        arguments: Value,
    },
    ToolInvocationCompleted {
        tool_name: Option<String>,
        tool_call_id: Option<ToolCallId>,
        success: bool,
        result: Option<String>,
    },
    TurnCompleted,
    SessionIdle,
    Error {
        message: String,
    },
    Other {
        event_type: String,
    },
}

impl SessionEvent {
    pub fn classify(raw: &RawEvent) -> Self {
        let data = &raw.data;
        match EventKind::classify(&raw.event_type) {
            EventKind::MessageDelta => Self::MessageDelta {
                content: first_str(data, &["deltaContent", "content", "delta"])
                    .unwrap_or_default(),
            },
            EventKind::ToolInvocationStarted => Self::ToolInvocationStarted {
                tool_name: tool_name(data),
                tool_call_id: tool_call_id(data),
                arguments: data
                    .get("arguments")
                    .or_else(|| data.get("args"))
                    .cloned()
                    .unwrap_or(Value::Null),
            },
            EventKind::ToolInvocationCompleted => Self::ToolInvocationCompleted {
                tool_name: tool_name(data),
                tool_call_id: tool_call_id(data),
                success: data
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or_else(|| data.get("error").map_or(true, Value::is_null)),
                result: data.get("result").and_then(|r| match r {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                }),
            },
            EventKind::TurnCompleted => Self::TurnCompleted,
            EventKind::SessionIdle => Self::SessionIdle,
            EventKind::Error => Self::Error {
                message: error_message(data),
            },
            EventKind::Other => Self::Other {
                event_type: raw.event_type.clone(),
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageDelta { .. } => EventKind::MessageDelta,
            Self::ToolInvocationStarted { .. } => EventKind::ToolInvocationStarted,
            Self::ToolInvocationCompleted { .. } => EventKind::ToolInvocationCompleted,
            Self::TurnCompleted => EventKind::TurnCompleted,
            Self::SessionIdle => EventKind::SessionIdle,
            Self::Error { .. } => EventKind::Error,
            Self::Other { .. } => EventKind::Other,
        }
    }
}

fn first_str(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(String::from)
}

fn tool_name(data: &Value) -> Option<String> {
    first_str(data, &["toolName", "tool_name", "name"]).or_else(|| {
        data.get("tool")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            .map(String::from)
    })
}

fn tool_call_id(data: &Value) -> Option<ToolCallId> {
    first_str(data, &["toolCallId", "tool_call_id", "callId"]).map(ToolCallId::from_raw)
}

fn error_message(data: &Value) -> String {
    if let Some(msg) = first_str(data, &["message"]) {
        return msg;
    }
    match data.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(err) => err
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| err.to_string()),
        None if data.is_null() => "unknown error".into(),
        None => data.to_string(),
    }
}
