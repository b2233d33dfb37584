use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use runwatch_core::tools::duration_ms;
use runwatch_core::{EventKind, RunId, SessionId, TurnId};

use crate::error::RunError;
use crate::signals::ToolCallStats;

/// How the bounded wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

/// Everything known about a run that got as far as sending its prompt.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub outcome: WaitOutcome,
    /// The signal that ended the wait; `None` on timeout.
    pub terminal_signal: Option<EventKind>,
    pub notification_tool: String,
    pub notification_invoked: bool,
    /// `None` when no completion for the notification tool was seen.
    pub notification_succeeded: Option<bool>,
    pub tool_calls: BTreeMap<String, ToolCallStats>,
    pub stream_errors: u32,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        match (self.notification_invoked, self.outcome) {
            (true, _) => RunSummary::NotificationSent,
            (false, WaitOutcome::Completed) => RunSummary::CompletedWithoutNotification,
            (false, WaitOutcome::TimedOut) => RunSummary::TimedOutWithoutNotification,
        }
    }

    /// Emit the end-of-run record. A missing notification is a policy
    /// violation worth a warning, not a failure.
    pub fn log(&self) {
        let summary = self.summary();
        if self.notification_invoked {
            info!(
                run_id = %self.run_id,
                outcome = ?self.outcome,
                notification_succeeded = ?self.notification_succeeded,
                stream_errors = self.stream_errors,
                elapsed_ms = self.elapsed.as_millis() as u64,
                "{summary}"
            );
        } else {
            warn!(
                run_id = %self.run_id,
                outcome = ?self.outcome,
                tool = %self.notification_tool,
                stream_errors = self.stream_errors,
                elapsed_ms = self.elapsed.as_millis() as u64,
                "{summary}"
            );
        }
    }
}

/// One-line verdict for operators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunSummary {
    NotificationSent,
    CompletedWithoutNotification,
    TimedOutWithoutNotification,
    StartupFailed(String),
}

impl RunSummary {
    pub fn from_error(err: &RunError) -> Self {
        Self::StartupFailed(err.to_string())
    }

    /// Process exit status for this verdict.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotificationSent => 0,
            Self::StartupFailed(_) => 1,
            Self::CompletedWithoutNotification | Self::TimedOutWithoutNotification => 2,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotificationSent => f.write_str("required notification sent"),
            Self::CompletedWithoutNotification => {
                f.write_str("run completed without required notification")
            }
            Self::TimedOutWithoutNotification => {
                f.write_str("run timed out without required notification")
            }
            Self::StartupFailed(reason) => write!(f, "startup failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use runwatch_core::ClientError;

    use super::*;

    fn report(outcome: WaitOutcome, invoked: bool) -> RunReport {
        RunReport {
            run_id: RunId::new(),
            session_id: SessionId::from_raw("s-1"),
            turn_id: TurnId::from_raw("t-1"),
            outcome,
            terminal_signal: None,
            notification_tool: "send-notification".into(),
            notification_invoked: invoked,
            notification_succeeded: None,
            tool_calls: BTreeMap::new(),
            stream_errors: 0,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn summary_texts() {
        assert_eq!(
            report(WaitOutcome::Completed, true).summary().to_string(),
            "required notification sent"
        );
        assert_eq!(
            report(WaitOutcome::TimedOut, true).summary(),
            RunSummary::NotificationSent
        );
        assert_eq!(
            report(WaitOutcome::Completed, false).summary().to_string(),
            "run completed without required notification"
        );
        assert_eq!(
            report(WaitOutcome::TimedOut, false).summary().to_string(),
            "run timed out without required notification"
        );

        let err = RunError::ClientStart(ClientError::Spawn("copilot: not found".into()));
        assert_eq!(
            RunSummary::from_error(&err).to_string(),
            "startup failed: client start failed: failed to launch runtime: copilot: not found"
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunSummary::NotificationSent.exit_code(), 0);
        assert_eq!(RunSummary::StartupFailed("x".into()).exit_code(), 1);
        assert_eq!(RunSummary::TimedOutWithoutNotification.exit_code(), 2);
    }

    #[test]
    fn serializes_for_json_output() {
        let json = serde_json::to_value(report(WaitOutcome::TimedOut, false)).unwrap();
        assert_eq!(json["outcome"], "timed_out");
        assert_eq!(json["elapsed"], 1500);
        assert_eq!(json["session_id"], "s-1");
        assert!(json["terminal_signal"].is_null());
    }
}
