//! Agent session, monitoring scope, and notification settings.

use serde::{Deserialize, Serialize};

/// Agent session behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Target model. `None` lets the runtime pick its default.
    pub model: Option<String>,
    /// Enables autonomous multi-step tool use.
    pub agent_mode: bool,
    /// Upper bound on how long a run waits for a terminal signal.
    pub deadline_secs: u64,
    /// End the wait on a tool completion only when it is the notification tool.
    pub notification_only_terminal: bool,
    /// Echo assistant message deltas to stdout.
    pub echo_transcript: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: Some("gpt-5".to_string()),
            agent_mode: true,
            deadline_secs: 600,
            notification_only_terminal: false,
            echo_transcript: true,
        }
    }
}

/// Repositories and time window the agent inspects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    /// `owner/name` repository slugs.
    pub repositories: Vec<String>,
    /// How far back to look for failed runs.
    pub lookback_hours: u32,
    /// Who is told when no failures are found. Must not be empty, since
    /// every run ends with exactly one notification.
    pub fallback_recipients: Vec<String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            repositories: vec!["devops-unleashed/workflow-example-powershell".to_string()],
            lookback_hours: 24,
            fallback_recipients: vec!["ci-alerts@example.com".to_string()],
        }
    }
}

/// Notification tool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Name the tool is registered under.
    pub tool_name: String,
    pub default_subject: String,
    pub default_body: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            tool_name: "send-notification".to_string(),
            default_subject: "Workflow Failure Notification".to_string(),
            default_body: "A scheduled integration workflow has failed. Please check the repo."
                .to_string(),
        }
    }
}
