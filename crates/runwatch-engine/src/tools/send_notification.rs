use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use runwatch_core::{Tool, ToolContext, ToolError, ToolResult};
use runwatch_settings::{is_email_like, NotificationSettings};
use runwatch_telemetry::AUDIT_TARGET;

/// A notification as handed to the delivery sink.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeliveryRecord {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Plain-text rendering returned to the agent and written to the audit log.
    pub fn render(&self) -> String {
        format!(
            "[EMAIL OUTPUT]\nTo: {}\nSubject: {}\n\n{}",
            self.recipients.join(", "),
            self.subject,
            self.body
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Where delivery records go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, record: &DeliveryRecord) -> Result<(), SinkError>;
}

/// Writes each record to the audit log target. No mail leaves the process.
pub struct AuditLogSink;

#[async_trait]
impl NotificationSink for AuditLogSink {
    fn name(&self) -> &str {
        "audit-log"
    }

    async fn deliver(&self, record: &DeliveryRecord) -> Result<(), SinkError> {
        info!(
            target: AUDIT_TARGET,
            recipients = %record.recipients.join(", "),
            subject = %record.subject,
            sent_at = %record.sent_at.to_rfc3339(),
            "{}",
            record.render()
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("No recipients provided.")]
    MissingRecipients,
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("notification cancelled: session ended")]
    Cancelled,
}

impl NotificationError {
    /// The caller sent something unusable, as opposed to delivery breaking.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::DeliveryFailed(_) | Self::Cancelled)
    }

    /// JSON text returned to the agent as the tool result.
    pub fn to_payload(&self) -> String {
        serde_json::json!({"status": "error", "message": self.to_string()}).to_string()
    }
}

/// Sends a workflow-failure email to a list of committers.
pub struct SendNotificationTool {
    name: String,
    default_subject: String,
    default_body: String,
    sink: Arc<dyn NotificationSink>,
}

impl SendNotificationTool {
    pub fn new(sink: Arc<dyn NotificationSink>, settings: &NotificationSettings) -> Self {
        Self {
            name: settings.tool_name.clone(),
            default_subject: settings.default_subject.clone(),
            default_body: settings.default_body.clone(),
            sink,
        }
    }

    /// Validate the arguments and hand the resulting record to the sink.
    pub async fn send(&self, args: &Value) -> Result<DeliveryRecord, NotificationError> {
        let record = self.build_record(args)?;

        let delivery = AssertUnwindSafe(self.sink.deliver(&record))
            .catch_unwind()
            .await;
        match delivery {
            Ok(Ok(())) => {
                info!(
                    tool = %self.name,
                    sink = self.sink.name(),
                    recipients = record.recipients.len(),
                    "notification delivered"
                );
                Ok(record)
            }
            Ok(Err(e)) => {
                error!(tool = %self.name, sink = self.sink.name(), error = %e, "notification sink failed");
                Err(NotificationError::DeliveryFailed(e.to_string()))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(tool = %self.name, sink = self.sink.name(), panic = %message, "notification sink panicked");
                Err(NotificationError::DeliveryFailed(format!("sink panicked: {message}")))
            }
        }
    }

    fn build_record(&self, args: &Value) -> Result<DeliveryRecord, NotificationError> {
        let args = unwrap_arguments(args)?;
        let recipients = parse_recipients(args.get("recipients"))?;
        let subject = optional_text(&args, "subject")?.unwrap_or_else(|| self.default_subject.clone());
        let body = optional_text(&args, "body")?.unwrap_or_else(|| self.default_body.clone());

        Ok(DeliveryRecord {
            recipients,
            subject,
            body,
            sent_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Tool for SendNotificationTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Send an email notification to a list of committers about a workflow failure."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["recipients", "subject", "body"],
            "properties": {
                "recipients": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "description": "Email addresses of the committers to notify"
                },
                "subject": {
                    "type": "string",
                    "description": "Email subject line"
                },
                "body": {
                    "type": "string",
                    "description": "Email body: repository, run id, and failure summary"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let outcome = tokio::select! {
            outcome = self.send(&args) => outcome,
            () = ctx.abort_signal.cancelled() => {
                warn!(tool = %self.name, call_id = %ctx.tool_call_id, "notification abandoned by session teardown");
                Err(NotificationError::Cancelled)
            }
        };
        match outcome {
            Ok(record) => Ok(ToolResult::text(record.render(), start.elapsed())),
            Err(e) => {
                if e.is_input_error() {
                    warn!(tool = %self.name, call_id = %ctx.tool_call_id, error = %e, "rejected notification arguments");
                }
                Ok(ToolResult::error(e.to_payload(), start.elapsed()))
            }
        }
    }
}

/// Use the inner `arguments` object when the caller wrapped its arguments,
/// otherwise the mapping itself.
fn unwrap_arguments(args: &Value) -> Result<Map<String, Value>, NotificationError> {
    match args.get("arguments") {
        Some(Value::Object(inner)) => return Ok(inner.clone()),
        Some(Value::String(encoded)) => {
            if let Ok(Value::Object(inner)) = serde_json::from_str::<Value>(encoded) {
                return Ok(inner);
            }
        }
        _ => {}
    }
    match args {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(NotificationError::InvalidArguments(format!(
            "expected an object, got {}",
            json_type(other)
        ))),
    }
}

fn parse_recipients(value: Option<&Value>) -> Result<Vec<String>, NotificationError> {
    let items = match value {
        None | Some(Value::Null) => return Err(NotificationError::MissingRecipients),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(NotificationError::InvalidArguments(format!(
                "recipients must be an array of strings, got {}",
                json_type(other)
            )))
        }
    };

    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    let mut rejected = Vec::new();
    for item in items {
        let address = item.as_str().ok_or_else(|| {
            NotificationError::InvalidArguments("recipients must be an array of strings".into())
        })?;
        let address = address.trim();
        if address.is_empty() {
            continue;
        }
        if !is_email_like(address) {
            warn!(recipient = %address, "skipping recipient that is not an email address");
            rejected.push(address.to_string());
            continue;
        }
        if seen.insert(address.to_lowercase()) {
            recipients.push(address.to_string());
        }
    }

    match (recipients.is_empty(), rejected.is_empty()) {
        (false, _) => Ok(recipients),
        (true, true) => Err(NotificationError::MissingRecipients),
        (true, false) => Err(NotificationError::InvalidRecipient(rejected.join(", "))),
    }
}

/// A trimmed, non-blank string field. Absent, null and blank all mean "use the default".
fn optional_text(args: &Map<String, Value>, key: &str) -> Result<Option<String>, NotificationError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(other) => Err(NotificationError::InvalidArguments(format!(
            "{key} must be a string, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
