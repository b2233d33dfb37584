pub mod client;
pub mod errors;
pub mod events;
pub mod ids;
pub mod tools;

pub use client::{AgentClient, AgentSession, EventListener, SessionConfig};
pub use errors::ClientError;
pub use events::{EventKind, RawEvent, SessionEvent};
pub use ids::{RunId, SessionId, ToolCallId, TurnId};
pub use tools::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
