use std::fmt::Write as _;

use runwatch_settings::RunwatchSettings;

/// The natural-language task handed to the agent at the start of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskPrompt {
    pub repositories: Vec<String>,
    pub lookback_hours: u32,
    pub notification_tool: String,
    pub fallback_recipients: Vec<String>,
}

impl TaskPrompt {
    pub fn from_settings(settings: &RunwatchSettings) -> Self {
        Self {
            repositories: settings
                .monitor
                .repositories
                .iter()
                .map(|r| r.trim())
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect(),
            lookback_hours: settings.monitor.lookback_hours,
            notification_tool: settings.notification.tool_name.clone(),
            fallback_recipients: settings.monitor.fallback_recipients.clone(),
        }
    }

    pub fn render(&self) -> String {
        let tool = &self.notification_tool;
        let mut out = String::new();

        let _ = writeln!(out, "Monitor these repositories: {}.", self.repositories.join(", "));
        let _ = writeln!(out, "For each repository:");
        let _ = writeln!(out, "1. Use the available GitHub tools to list its workflows.");
        let _ = writeln!(
            out,
            "2. For each workflow, list the runs from the last {} hours whose conclusion is 'failure'.",
            self.lookback_hours
        );
        let _ = writeln!(
            out,
            "3. For each failed run, get its details, find the most recent successful run of the same \
             workflow before it, and list the commits between the successful run's head_sha and the \
             failed run's head_sha."
        );
        let _ = writeln!(
            out,
            "4. Collect the unique committer email addresses from those commits (prefer author.email; \
             skip any noreply address)."
        );
        let _ = writeln!(
            out,
            "5. If there are committers, call the `{tool}` tool with those recipients, the subject \
             'Workflow Failure in <repository>', and a body giving the run ID, the repository, and a \
             short failure summary (read the logs if needed)."
        );
        let _ = writeln!(
            out,
            "If no failures are found, call `{tool}` once with recipients [{}], the subject \
             'No workflow failures', and a body listing the repositories checked.",
            self.fallback_recipients.join(", ")
        );
        let _ = writeln!(out, "Call `{tool}` exactly once per run.");
        let _ = write!(out, "Finish by summarizing the actions you took.");
        out
    }
}
