//! Per-run signal state fed by the session event listener.
//!
//! Listeners run on the runtime's delivery task while the orchestrator
//! waits on another, so everything here is updated through atomics, a
//! concurrent map, or the watch channel that carries the terminal flag.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use runwatch_core::{EventKind, SessionEvent};

/// Name recorded for tool events that do not say which tool they concern.
pub const UNKNOWN_TOOL: &str = "<unknown>";

/// Counters for one tool within a run. They only ever increase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ToolCallStats {
    pub started: u32,
    pub completed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Tool name → call counters, for one run.
#[derive(Debug, Default)]
pub struct ToolCallRecord {
    calls: DashMap<String, ToolCallStats>,
}

impl ToolCallRecord {
    pub fn record_started(&self, tool: &str) {
        self.calls.entry(tool.to_string()).or_default().started += 1;
    }

    pub fn record_completed(&self, tool: &str, success: bool) {
        let mut stats = self.calls.entry(tool.to_string()).or_default();
        stats.completed += 1;
        if success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
    }

    pub fn get(&self, tool: &str) -> ToolCallStats {
        self.calls.get(tool).map(|s| *s).unwrap_or_default()
    }

    /// Point-in-time copy, ordered by tool name.
    pub fn snapshot(&self) -> BTreeMap<String, ToolCallStats> {
        self.calls
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

pub struct RunSignals {
    notification_tool: String,
    notification_only_terminal: bool,
    notification_invoked: AtomicBool,
    notification_completed: AtomicBool,
    notification_succeeded: AtomicBool,
    stream_errors: AtomicU32,
    tool_calls: ToolCallRecord,
    /// Tool call id → tool name, for completions that only carry the id.
    call_names: DashMap<String, String>,
    terminal: watch::Sender<Option<EventKind>>,
}

impl RunSignals {
    pub fn new(notification_tool: impl Into<String>, notification_only_terminal: bool) -> Self {
        let (terminal, _) = watch::channel(None);
        Self {
            notification_tool: notification_tool.into(),
            notification_only_terminal,
            notification_invoked: AtomicBool::new(false),
            notification_completed: AtomicBool::new(false),
            notification_succeeded: AtomicBool::new(false),
            stream_errors: AtomicU32::new(0),
            tool_calls: ToolCallRecord::default(),
            call_names: DashMap::new(),
            terminal,
        }
    }

    /// Fold one classified event into the run state.
    pub fn observe(&self, event: &SessionEvent) {
        let mut concerns_notification = false;
        match event {
            SessionEvent::ToolInvocationStarted {
                tool_name,
                tool_call_id,
                ..
            } => {
                let name = tool_name.as_deref().unwrap_or(UNKNOWN_TOOL);
                self.tool_calls.record_started(name);
                if let Some(id) = tool_call_id {
                    let _ = self.call_names.insert(id.as_str().to_string(), name.to_string());
                }
                if name == self.notification_tool {
                    self.mark_notification_invoked();
                }
            }
            SessionEvent::ToolInvocationCompleted {
                tool_name,
                tool_call_id,
                success,
                ..
            } => {
                let name = tool_name.clone().or_else(|| {
                    tool_call_id
                        .as_ref()
                        .and_then(|id| self.call_names.get(id.as_str()).map(|n| n.value().clone()))
                });
                let name = name.as_deref().unwrap_or(UNKNOWN_TOOL);
                self.tool_calls.record_completed(name, *success);

                concerns_notification = name == self.notification_tool;
                if concerns_notification {
                    self.mark_notification_invoked();
                    let _ = self.notification_succeeded.fetch_or(*success, Ordering::SeqCst);
                    self.notification_completed.store(true, Ordering::SeqCst);
                }
            }
            SessionEvent::Error { message } => {
                let count = self.stream_errors.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(error = %message, count, "agent stream reported an error");
            }
            SessionEvent::TurnCompleted
            | SessionEvent::SessionIdle
            | SessionEvent::MessageDelta { .. }
            | SessionEvent::Other { .. } => {}
        }

        let kind = event.kind();
        if kind.is_terminal() && self.ends_wait(kind, concerns_notification) {
            self.mark_terminal(kind);
        }
    }

    /// With `notification_only_terminal`, a tool completion ends the wait
    /// only when it belongs to the notification tool.
    fn ends_wait(&self, kind: EventKind, concerns_notification: bool) -> bool {
        kind != EventKind::ToolInvocationCompleted
            || concerns_notification
            || !self.notification_only_terminal
    }

    fn mark_notification_invoked(&self) {
        if !self.notification_invoked.swap(true, Ordering::SeqCst) {
            info!(tool = %self.notification_tool, "required notification invoked");
        }
    }

    fn mark_terminal(&self, kind: EventKind) {
        let first = self.terminal.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(kind);
            true
        });
        if first {
            debug!(signal = %kind, "terminal signal observed");
        }
    }

    /// Resolves once a terminal signal has been observed.
    pub async fn wait_terminal(&self) {
        let mut rx = self.terminal.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// The first terminal signal seen, if any.
    pub fn terminal_signal(&self) -> Option<EventKind> {
        *self.terminal.borrow()
    }

    pub fn notification_tool(&self) -> &str {
        &self.notification_tool
    }

    pub fn notification_invoked(&self) -> bool {
        self.notification_invoked.load(Ordering::SeqCst)
    }

    /// `None` until a completion for the notification tool arrives.
    pub fn notification_succeeded(&self) -> Option<bool> {
        self.notification_completed
            .load(Ordering::SeqCst)
            .then(|| self.notification_succeeded.load(Ordering::SeqCst))
    }

    pub fn stream_errors(&self) -> u32 {
        self.stream_errors.load(Ordering::SeqCst)
    }

    pub fn tool_calls(&self) -> &ToolCallRecord {
        &self.tool_calls
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use runwatch_core::{RawEvent, ToolCallId};
    use serde_json::json;

    use super::*;

    const TOOL: &str = "send-notification";

    fn observe(signals: &RunSignals, event_type: &str, data: serde_json::Value) {
        signals.observe(&SessionEvent::classify(&RawEvent::new(event_type, data)));
    }

    #[test]
    fn notification_start_sets_flag_once() {
        let signals = RunSignals::new(TOOL, false);
        observe(&signals, "tool.execution_start", json!({"toolName": TOOL}));
        observe(&signals, "tool.execution_start", json!({"toolName": TOOL}));

        assert!(signals.notification_invoked());
        assert_eq!(signals.tool_calls().get(TOOL).started, 2);
        assert_eq!(signals.notification_succeeded(), None);
        assert_eq!(signals.terminal_signal(), None);
    }

    #[test]
    fn any_tool_completion_is_terminal_by_default() {
        let signals = RunSignals::new(TOOL, false);
        observe(&signals, "tool.execution_start", json!({"toolName": "github-list_workflows"}));
        observe(
            &signals,
            "tool.execution_complete",
            json!({"toolName": "github-list_workflows", "success": true}),
        );

        assert_eq!(signals.terminal_signal(), Some(EventKind::ToolInvocationCompleted));
        assert!(!signals.notification_invoked());
        let stats = signals.tool_calls().get("github-list_workflows");
        assert_eq!(stats, ToolCallStats { started: 1, completed: 1, succeeded: 1, failed: 0 });
    }

    #[test]
    fn notification_only_mode_ignores_other_completions() {
        let signals = RunSignals::new(TOOL, true);
        observe(&signals, "tool.execution_complete", json!({"toolName": "github-list_workflows"}));
        assert_eq!(signals.terminal_signal(), None);

        observe(&signals, "tool.execution_complete", json!({"toolName": TOOL, "success": true}));
        assert_eq!(signals.terminal_signal(), Some(EventKind::ToolInvocationCompleted));
        assert_eq!(signals.notification_succeeded(), Some(true));
    }

    #[test]
    fn notification_only_mode_still_ends_on_turn_end() {
        let signals = RunSignals::new(TOOL, true);
        observe(&signals, "assistant.turn_end", json!(null));
        assert_eq!(signals.terminal_signal(), Some(EventKind::TurnCompleted));
    }

    #[test]
    fn completion_resolved_by_call_id() {
        let signals = RunSignals::new(TOOL, false);
        let call = ToolCallId::new();
        observe(
            &signals,
            "tool.execution_start",
            json!({"toolName": TOOL, "toolCallId": call}),
        );
        observe(
            &signals,
            "tool.execution_complete",
            json!({"toolCallId": call, "success": false}),
        );

        assert_eq!(signals.notification_succeeded(), Some(false));
        assert_eq!(signals.tool_calls().get(TOOL).failed, 1);
        assert_eq!(signals.terminal_signal(), Some(EventKind::ToolInvocationCompleted));
    }

    #[test]
    fn first_terminal_signal_wins() {
        let signals = RunSignals::new(TOOL, false);
        observe(&signals, "assistant.turn_end", json!(null));
        observe(&signals, "session.idle", json!(null));
        assert_eq!(signals.terminal_signal(), Some(EventKind::TurnCompleted));
    }

    #[test]
    fn errors_are_counted_not_terminal() {
        let signals = RunSignals::new(TOOL, false);
        observe(&signals, "session.error", json!({"message": "rate limited"}));
        observe(&signals, "session.error", json!({"message": "rate limited"}));
        assert_eq!(signals.stream_errors(), 2);
        assert_eq!(signals.terminal_signal(), None);
    }

    #[test]
    fn snapshot_is_ordered() {
        let record = ToolCallRecord::default();
        record.record_started("zeta");
        record.record_started("alpha");
        record.record_completed("alpha", false);
        let snapshot = record.snapshot();
        let names: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(snapshot["alpha"].failed, 1);
    }

    #[tokio::test]
    async fn wait_terminal_wakes_on_signal() {
        let signals = Arc::new(RunSignals::new(TOOL, false));
        let waiter = {
            let signals = Arc::clone(&signals);
            tokio::spawn(async move { signals.wait_terminal().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        observe(&signals, "session.idle", json!(null));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_terminal_returns_if_already_set() {
        let signals = RunSignals::new(TOOL, false);
        observe(&signals, "assistant.turn_end", json!(null));
        tokio::time::timeout(Duration::from_millis(10), signals.wait_terminal())
            .await
            .unwrap();
    }
}
