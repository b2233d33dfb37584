//! Session orchestrator: one agent run from client start to teardown.
//!
//! A run starts the client, opens a single session exposing the registry's
//! tools, subscribes to its events, sends the task prompt, and waits until a
//! terminal signal arrives or the deadline passes. The session and client
//! are released exactly once whichever way the run ends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use runwatch_core::{
    AgentClient, AgentSession, ClientError, EventListener, RawEvent, RunId, SessionConfig,
    SessionEvent, TurnId,
};
use runwatch_settings::RunwatchSettings;

use crate::error::RunError;
use crate::registry::ToolRegistry;
use crate::report::{RunReport, WaitOutcome};
use crate::signals::RunSignals;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub model: Option<String>,
    pub agent_mode: bool,
    /// Upper bound on the wait for a terminal signal.
    pub deadline: Duration,
    /// Tool whose invocation the run is expected to produce.
    pub notification_tool: String,
    /// End the wait on a tool completion only when it is the notification
    /// tool. By default any tool completion ends it.
    pub notification_only_terminal: bool,
    /// Echo assistant message deltas to stdout.
    pub echo_transcript: bool,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &RunwatchSettings) -> Self {
        Self {
            model: settings.agent.model.clone(),
            agent_mode: settings.agent.agent_mode,
            deadline: Duration::from_secs(settings.agent.deadline_secs),
            notification_tool: settings.notification.tool_name.clone(),
            notification_only_terminal: settings.agent.notification_only_terminal,
            echo_transcript: settings.agent.echo_transcript,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&RunwatchSettings::default())
    }
}

/// Lifecycle of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Created,
    Starting,
    SessionActive,
    PromptSent,
    Waiting,
    Completed,
    TimedOut,
    Failed,
    TornDown,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::SessionActive => "session_active",
            Self::PromptSent => "prompt_sent",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
            Self::TornDown => "torn_down",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct PhaseTracker {
    current: RunPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            current: RunPhase::Created,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        debug!(from = %self.current, to = %next, "run phase");
        self.current = next;
    }
}

/// Holds whatever a run has acquired and releases it once.
struct RunScope {
    client: Arc<dyn AgentClient>,
    session: Option<Box<dyn AgentSession>>,
    released: bool,
}

impl RunScope {
    fn new(client: Arc<dyn AgentClient>) -> Self {
        Self {
            client,
            session: None,
            released: false,
        }
    }

    fn attach(&mut self, session: Box<dyn AgentSession>) {
        self.session = Some(session);
    }

    async fn send(&self, prompt: &str) -> Result<TurnId, ClientError> {
        match &self.session {
            Some(session) => session.send(prompt).await,
            None => Err(ClientError::Session("no active session".into())),
        }
    }

    /// Destroy the session (if any), then stop the client. Failures are
    /// logged and swallowed. Later calls do nothing.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(session) = self.session.take() {
            match session.destroy().await {
                Ok(()) => debug!(session_id = %session.id(), "session destroyed"),
                Err(e) => warn!(session_id = %session.id(), error = %e, kind = e.error_kind(), "session destroy failed"),
            }
        }
        match self.client.stop().await {
            Ok(()) => debug!("client stopped"),
            Err(e) => warn!(error = %e, kind = e.error_kind(), "client stop failed"),
        }
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let session = self.session.take();
        let client = Arc::clone(&self.client);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("run abandoned before teardown, releasing in the background");
                drop(handle.spawn(async move {
                    if let Some(session) = session {
                        if let Err(e) = session.destroy().await {
                            warn!(error = %e, "session destroy failed");
                        }
                    }
                    if let Err(e) = client.stop().await {
                        warn!(error = %e, "client stop failed");
                    }
                }));
            }
            Err(_) => error!("run abandoned outside a tokio runtime, session not released"),
        }
    }
}

pub struct SessionOrchestrator {
    client: Arc<dyn AgentClient>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl SessionOrchestrator {
    pub fn new(
        client: Arc<dyn AgentClient>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    /// Execute one run. Only startup failures are errors; a run that ends
    /// without the notification still yields a report.
    pub async fn run(&self, prompt: &str) -> Result<RunReport, RunError> {
        let run_id = RunId::new();
        let span = info_span!(
            "run",
            run_id = %run_id,
            model = self.config.model.as_deref().unwrap_or("default"),
            session_id = tracing::field::Empty,
        );
        self.run_inner(run_id, prompt).instrument(span).await
    }

    async fn run_inner(&self, run_id: RunId, prompt: &str) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let mut phase = PhaseTracker::new();

        phase.advance(RunPhase::Starting);
        if let Err(e) = self.client.start().await {
            let err = RunError::ClientStart(e);
            log_abort(&err);
            phase.advance(RunPhase::Failed);
            phase.advance(RunPhase::TornDown);
            return Err(err);
        }
        let mut scope = RunScope::new(Arc::clone(&self.client));

        if !self.registry.contains(&self.config.notification_tool) {
            warn!(
                tool = %self.config.notification_tool,
                "notification tool is not registered, the agent cannot send the notification"
            );
        }

        let session_config = SessionConfig {
            model: self.config.model.clone(),
            agent_mode: self.config.agent_mode,
            tools: self.registry.tools(),
        };
        let session = match self.client.create_session(session_config).await {
            Ok(session) => session,
            Err(e) => {
                let err = RunError::SessionCreate(e);
                log_abort(&err);
                phase.advance(RunPhase::Failed);
                scope.release().await;
                phase.advance(RunPhase::TornDown);
                return Err(err);
            }
        };
        let session_id = session.id().clone();
        tracing::Span::current().record("session_id", session_id.as_str());

        let signals = Arc::new(RunSignals::new(
            self.config.notification_tool.clone(),
            self.config.notification_only_terminal,
        ));
        session.on(signal_listener(Arc::clone(&signals)));
        let printer = if self.config.echo_transcript {
            let (listener, printer) = spawn_transcript(tokio::io::stdout());
            session.on(listener);
            Some(printer)
        } else {
            None
        };
        scope.attach(session);
        phase.advance(RunPhase::SessionActive);
        info!(tool_count = self.registry.len(), tools = ?self.registry.names(), "session ready");

        let turn_id = match scope.send(prompt).await {
            Ok(turn_id) => turn_id,
            Err(e) => {
                let err = RunError::PromptSend(e);
                log_abort(&err);
                phase.advance(RunPhase::Failed);
                scope.release().await;
                phase.advance(RunPhase::TornDown);
                return Err(err);
            }
        };
        phase.advance(RunPhase::PromptSent);

        phase.advance(RunPhase::Waiting);
        let outcome = match tokio::time::timeout(self.config.deadline, signals.wait_terminal()).await
        {
            Ok(()) => {
                phase.advance(RunPhase::Completed);
                WaitOutcome::Completed
            }
            Err(_) => {
                warn!(deadline_secs = self.config.deadline.as_secs(), "deadline elapsed before a terminal signal");
                phase.advance(RunPhase::TimedOut);
                WaitOutcome::TimedOut
            }
        };

        scope.release().await;
        phase.advance(RunPhase::TornDown);
        if let Some(printer) = printer {
            if tokio::time::timeout(TRANSCRIPT_DRAIN, printer).await.is_err() {
                debug!("transcript printer still draining after teardown");
            }
        }

        let report = RunReport {
            run_id,
            session_id,
            turn_id,
            outcome,
            terminal_signal: signals.terminal_signal(),
            notification_tool: signals.notification_tool().to_string(),
            notification_invoked: signals.notification_invoked(),
            notification_succeeded: signals.notification_succeeded(),
            tool_calls: signals.tool_calls().snapshot(),
            stream_errors: signals.stream_errors(),
            elapsed: started.elapsed(),
        };
        report.log();
        Ok(report)
    }
}

fn signal_listener(signals: Arc<RunSignals>) -> EventListener {
    Arc::new(move |raw: &RawEvent| {
        let event = SessionEvent::classify(raw);
        debug!(event_type = %raw.event_type, kind = %event.kind(), "session event");
        signals.observe(&event);
    })
}

fn log_abort(err: &RunError) {
    let cause = err.client_error();
    error!(stage = err.stage(), kind = cause.error_kind(), error = %cause, "run aborted");
}

const TRANSCRIPT_DRAIN: Duration = Duration::from_secs(1);

/// Forwards assistant output to a printing task. The listener only enqueues,
/// so a stalled stdout never holds up event dispatch. The printer exits once
/// every listener clone is dropped with the session.
fn spawn_transcript<W>(out: W) -> (EventListener, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(print_transcript(rx, out));
    let listener: EventListener = Arc::new(move |raw: &RawEvent| {
        let chunk = match SessionEvent::classify(raw) {
            SessionEvent::MessageDelta { content } => content,
            SessionEvent::TurnCompleted => "\n".to_string(),
            _ => return,
        };
        if tx.send(chunk).is_err() {
            debug!("transcript printer gone, dropping output");
        }
    });
    (listener, printer)
}

async fn print_transcript<W>(mut rx: mpsc::UnboundedReceiver<String>, mut out: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = rx.recv().await {
        let written = async {
            out.write_all(chunk.as_bytes()).await?;
            out.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(error = %e, "transcript echo failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let mut settings = RunwatchSettings::default();
        settings.agent.deadline_secs = 90;
        settings.agent.model = None;
        settings.notification.tool_name = "send_email".into();

        let config = OrchestratorConfig::from_settings(&settings);
        assert_eq!(config.deadline, Duration::from_secs(90));
        assert_eq!(config.model, None);
        assert!(config.agent_mode);
        assert_eq!(config.notification_tool, "send_email");
        assert!(!config.notification_only_terminal);
    }

    #[tokio::test]
    async fn transcript_listener_does_not_wait_on_the_writer() {
        let (writer, mut reader) = tokio::io::duplex(4);
        let (listener, printer) = spawn_transcript(writer);

        listener(&RawEvent::new(
            "assistant.message_delta",
            serde_json::json!({"deltaContent": "Checking acme/api"}),
        ));
        listener(&RawEvent::new("assistant.turn_end", serde_json::Value::Null));
        listener(&RawEvent::new("session.idle", serde_json::Value::Null));
        drop(listener);

        let mut echoed = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut echoed)
            .await
            .unwrap();
        printer.await.unwrap();
        assert_eq!(echoed, "Checking acme/api\n");
    }

    #[test]
    fn phase_names() {
        assert_eq!(RunPhase::SessionActive.to_string(), "session_active");
        assert_eq!(RunPhase::TornDown.as_str(), "torn_down");
    }
}
