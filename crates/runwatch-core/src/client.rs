//! Agent runtime boundary.
//!
//! `AgentClient` owns the connection to the external conversational
//! runtime; `AgentSession` is one conversation opened on it. The runtime
//! decides on its own which registered tools to call and reports all of
//! its work through the session's event stream.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::events::RawEvent;
use crate::ids::{SessionId, TurnId};
use crate::tools::Tool;

/// Callback invoked for every event a session emits, in emission order.
pub type EventListener = Arc<dyn Fn(&RawEvent) + Send + Sync>;

/// Options recognised when opening a session.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Target model; the runtime default is used when `None`.
    pub model: Option<String>,
    /// Enables autonomous multi-step tool use.
    pub agent_mode: bool,
    /// Tools the runtime may call. MCP tools are added by the runtime itself.
    pub tools: Vec<Arc<dyn Tool>>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("agent_mode", &self.agent_mode)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn start(&self) -> Result<(), ClientError>;

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, ClientError>;

    async fn stop(&self) -> Result<(), ClientError>;
}

#[async_trait]
pub trait AgentSession: Send + Sync {
    fn id(&self) -> &SessionId;

    /// Register a listener. Every registered listener sees every event.
    fn on(&self, listener: EventListener);

    /// Submit a prompt. Returns as soon as the runtime accepts it; the
    /// agent's work is reported through the event stream.
    async fn send(&self, prompt: &str) -> Result<TurnId, ClientError>;

    async fn destroy(&self) -> Result<(), ClientError>;
}
