use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use runwatch_core::{
    AgentClient, AgentSession, ClientError, EventListener, RawEvent, SessionConfig, SessionId,
    Tool, ToolCallId, ToolContext, ToolResult, TurnId,
};

/// One step of a scripted agent turn, played after `send`.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Deliver an event to every listener.
    Emit(RawEvent),
    /// Sleep before the next step.
    Delay(Duration),
    /// Invoke a registered tool the way the runtime would, bracketed by
    /// `tool.execution_start` / `tool.execution_complete` events.
    CallTool { name: String, arguments: Value },
}

impl ScriptStep {
    pub fn emit(event_type: &str, data: Value) -> Self {
        Self::Emit(RawEvent::new(event_type, data))
    }

    pub fn delta(content: &str) -> Self {
        Self::emit("assistant.message_delta", json!({ "deltaContent": content }))
    }

    pub fn call_tool(name: &str, arguments: Value) -> Self {
        Self::CallTool {
            name: name.to_string(),
            arguments,
        }
    }
}

/// How many times each boundary operation was called.
#[derive(Debug, Default)]
pub struct CallCounts {
    start: AtomicUsize,
    create_session: AtomicUsize,
    send: AtomicUsize,
    destroy: AtomicUsize,
    stop: AtomicUsize,
}

impl CallCounts {
    pub fn start(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }
    pub fn create_session(&self) -> usize {
        self.create_session.load(Ordering::SeqCst)
    }
    pub fn send(&self) -> usize {
        self.send.load(Ordering::SeqCst)
    }
    pub fn destroy(&self) -> usize {
        self.destroy.load(Ordering::SeqCst)
    }
    pub fn stop(&self) -> usize {
        self.stop.load(Ordering::SeqCst)
    }
}

/// A tool call made by the scripted runtime, with what the tool returned.
#[derive(Clone, Debug)]
pub struct RecordedToolCall {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Result<ToolResult, String>,
}

#[derive(Clone, Default)]
struct Failures {
    start: Option<ClientError>,
    create_session: Option<ClientError>,
    send: Option<ClientError>,
    destroy: Option<ClientError>,
    stop: Option<ClientError>,
}

/// Deterministic agent runtime for tests and dry runs.
pub struct ScriptedClient {
    script: Arc<Vec<ScriptStep>>,
    failures: Failures,
    counts: Arc<CallCounts>,
    started: AtomicBool,
    prompts: Arc<Mutex<Vec<String>>>,
    tool_calls: Arc<Mutex<Vec<RecordedToolCall>>>,
    session_configs: Mutex<Vec<SessionConfig>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: Arc::new(script),
            failures: Failures::default(),
            counts: Arc::new(CallCounts::default()),
            started: AtomicBool::new(false),
            prompts: Arc::new(Mutex::new(Vec::new())),
            tool_calls: Arc::new(Mutex::new(Vec::new())),
            session_configs: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_start(mut self, err: ClientError) -> Self {
        self.failures.start = Some(err);
        self
    }

    pub fn fail_create_session(mut self, err: ClientError) -> Self {
        self.failures.create_session = Some(err);
        self
    }

    pub fn fail_send(mut self, err: ClientError) -> Self {
        self.failures.send = Some(err);
        self
    }

    pub fn fail_destroy(mut self, err: ClientError) -> Self {
        self.failures.destroy = Some(err);
        self
    }

    pub fn fail_stop(mut self, err: ClientError) -> Self {
        self.failures.stop = Some(err);
        self
    }

    pub fn counts(&self) -> Arc<CallCounts> {
        Arc::clone(&self.counts)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn tool_calls(&self) -> Vec<RecordedToolCall> {
        self.tool_calls.lock().clone()
    }

    pub fn session_configs(&self) -> Vec<SessionConfig> {
        self.session_configs.lock().clone()
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn start(&self) -> Result<(), ClientError> {
        let _ = self.counts.start.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failures.start {
            return Err(err.clone());
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, ClientError> {
        let _ = self.counts.create_session.fetch_add(1, Ordering::SeqCst);
        if !self.started.load(Ordering::SeqCst) {
            return Err(ClientError::NotStarted);
        }
        if let Some(err) = &self.failures.create_session {
            return Err(err.clone());
        }

        let tools = config
            .tools
            .iter()
            .map(|t| (t.name().to_string(), Arc::clone(t)))
            .collect();
        self.session_configs.lock().push(config);

        Ok(Box::new(ScriptedSession {
            id: SessionId::new(),
            listeners: Arc::new(RwLock::new(Vec::new())),
            tools: Arc::new(tools),
            script: Arc::clone(&self.script),
            failures: self.failures.clone(),
            counts: Arc::clone(&self.counts),
            prompts: Arc::clone(&self.prompts),
            tool_calls: Arc::clone(&self.tool_calls),
            player: Mutex::new(None),
        }))
    }

    async fn stop(&self) -> Result<(), ClientError> {
        let _ = self.counts.stop.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        match &self.failures.stop {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

type Listeners = Arc<RwLock<Vec<EventListener>>>;
type ToolMap = Arc<HashMap<String, Arc<dyn Tool>>>;

struct ScriptedSession {
    id: SessionId,
    listeners: Listeners,
    tools: ToolMap,
    script: Arc<Vec<ScriptStep>>,
    failures: Failures,
    counts: Arc<CallCounts>,
    prompts: Arc<Mutex<Vec<String>>>,
    tool_calls: Arc<Mutex<Vec<RecordedToolCall>>>,
    player: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl AgentSession for ScriptedSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn on(&self, listener: EventListener) {
        self.listeners.write().push(listener);
    }

    async fn send(&self, prompt: &str) -> Result<TurnId, ClientError> {
        let _ = self.counts.send.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failures.send {
            return Err(err.clone());
        }
        self.prompts.lock().push(prompt.to_string());

        let handle = tokio::spawn(play(
            Arc::clone(&self.script),
            Arc::clone(&self.listeners),
            Arc::clone(&self.tools),
            self.id.clone(),
            Arc::clone(&self.tool_calls),
        ));
        if let Some(previous) = self.player.lock().replace(handle) {
            previous.abort();
        }
        Ok(TurnId::new())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let _ = self.counts.destroy.fetch_add(1, Ordering::SeqCst);
        if let Some(player) = self.player.lock().take() {
            player.abort();
        }
        match &self.failures.destroy {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if let Some(player) = self.player.get_mut().take() {
            player.abort();
        }
    }
}

fn emit(listeners: &Listeners, event: &RawEvent) {
    let current = listeners.read().clone();
    for listener in &current {
        listener(event);
    }
}

async fn play(
    script: Arc<Vec<ScriptStep>>,
    listeners: Listeners,
    tools: ToolMap,
    session_id: SessionId,
    tool_calls: Arc<Mutex<Vec<RecordedToolCall>>>,
) {
    for step in script.iter() {
        match step {
            ScriptStep::Emit(event) => emit(&listeners, event),
            ScriptStep::Delay(duration) => tokio::time::sleep(*duration).await,
            ScriptStep::CallTool { name, arguments } => {
                let call_id = ToolCallId::new();
                emit(
                    &listeners,
                    &RawEvent::new(
                        "tool.execution_start",
                        json!({ "toolName": name, "toolCallId": call_id, "arguments": arguments }),
                    ),
                );

                let result = match tools.get(name) {
                    Some(tool) => {
                        let ctx = ToolContext::new(session_id.clone(), call_id.clone());
                        tool.execute(arguments.clone(), &ctx)
                            .await
                            .map_err(|e| e.to_string())
                    }
                    None => Err(format!("unknown tool: {name}")),
                };
                let (success, content) = match &result {
                    Ok(r) => (!r.is_error, r.content.clone()),
                    Err(e) => (false, e.clone()),
                };
                tool_calls.lock().push(RecordedToolCall {
                    tool_name: name.clone(),
                    arguments: arguments.clone(),
                    result,
                });

                emit(
                    &listeners,
                    &RawEvent::new(
                        "tool.execution_complete",
                        json!({
                            "toolName": name,
                            "toolCallId": call_id,
                            "success": success,
                            "result": content,
                        }),
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use runwatch_core::ToolError;

    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the text argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            match args["text"].as_str() {
                Some(text) => Ok(ToolResult::text(text.to_uppercase(), Duration::ZERO)),
                None => Err(ToolError::InvalidArguments("text is required".into())),
            }
        }
    }

    fn collect(session: &dyn AgentSession) -> tokio::sync::mpsc::UnboundedReceiver<RawEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        session.on(Arc::new(move |event: &RawEvent| {
            let _ = tx.send(event.clone());
        }));
        rx
    }

    #[tokio::test]
    async fn plays_script_in_order() {
        let client = ScriptedClient::new(vec![
            ScriptStep::delta("looking"),
            ScriptStep::Delay(Duration::from_millis(5)),
            ScriptStep::emit("session.idle", Value::Null),
        ]);
        client.start().await.unwrap();
        let session = client.create_session(SessionConfig::default()).await.unwrap();
        let mut rx = collect(&*session);

        let _ = session.send("go").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event_type, "assistant.message_delta");
        assert_eq!(rx.recv().await.unwrap().event_type, "session.idle");
        assert_eq!(client.prompts(), vec!["go"]);
    }

    #[tokio::test]
    async fn call_tool_runs_registered_tool() {
        let client = ScriptedClient::new(vec![
            ScriptStep::call_tool("upper", json!({"text": "hi"})),
            ScriptStep::call_tool("upper", json!({})),
            ScriptStep::call_tool("missing", json!({})),
        ]);
        client.start().await.unwrap();
        let session = client
            .create_session(SessionConfig {
                tools: vec![Arc::new(UpperTool)],
                ..SessionConfig::default()
            })
            .await
            .unwrap();
        let mut rx = collect(&*session);
        let _ = session.send("go").await.unwrap();

        let mut completions = Vec::new();
        while completions.len() < 3 {
            let event = rx.recv().await.unwrap();
            if event.event_type == "tool.execution_complete" {
                completions.push(event.data);
            }
        }
        assert_eq!(completions[0]["success"], true);
        assert_eq!(completions[0]["result"], "HI");
        assert_eq!(completions[1]["success"], false);
        assert_eq!(completions[2]["result"], "unknown tool: missing");

        let calls = client.tool_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].result.as_ref().unwrap().content, "HI");
        assert!(calls[1].result.is_err());
    }

    #[tokio::test]
    async fn injected_failures_are_counted() {
        let client = ScriptedClient::new(vec![])
            .fail_create_session(ClientError::Session("quota".into()))
            .fail_stop(ClientError::Disconnected);
        let counts = client.counts();

        client.start().await.unwrap();
        let err = client
            .create_session(SessionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Session(_)));
        assert!(client.stop().await.is_err());

        assert_eq!(counts.start(), 1);
        assert_eq!(counts.create_session(), 1);
        assert_eq!(counts.send(), 0);
        assert_eq!(counts.stop(), 1);
    }

    #[tokio::test]
    async fn create_before_start_is_rejected() {
        let client = ScriptedClient::new(vec![]);
        let err = client
            .create_session(SessionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::NotStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_stops_playback() {
        let client = ScriptedClient::new(vec![
            ScriptStep::Delay(Duration::from_secs(60)),
            ScriptStep::emit("session.idle", Value::Null),
        ]);
        client.start().await.unwrap();
        let session = client.create_session(SessionConfig::default()).await.unwrap();
        let mut rx = collect(&*session);
        let _ = session.send("go").await.unwrap();

        session.destroy().await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(client.counts().destroy(), 1);
    }
}
