//! # runwatch-engine
//!
//! Drives one CI-watch run against an agent runtime: the tool registry and
//! the send-notification tool, per-run signal tracking, the task prompt,
//! and the session orchestrator that ties them together.

pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod report;
pub mod signals;
pub mod tools;

pub use error::RunError;
pub use orchestrator::{OrchestratorConfig, RunPhase, SessionOrchestrator};
pub use prompt::TaskPrompt;
pub use registry::ToolRegistry;
pub use report::{RunReport, RunSummary, WaitOutcome};
pub use signals::{RunSignals, ToolCallRecord, ToolCallStats};
pub use tools::create_default_registry;
pub use tools::send_notification::{
    AuditLogSink, DeliveryRecord, NotificationError, NotificationSink, SendNotificationTool,
    SinkError,
};
