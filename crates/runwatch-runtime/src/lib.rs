//! Concrete agent runtime clients.
//!
//! - [`StdioAgentClient`]: JSON-RPC 2.0 over a child process's stdio.
//! - [`ScriptedClient`]: deterministic scripted runtime for tests and dry runs.

pub mod mock;
pub mod rpc;
pub mod stdio;

pub use mock::{CallCounts, RecordedToolCall, ScriptStep, ScriptedClient};
pub use stdio::{StdioAgentClient, StdioConfig};
