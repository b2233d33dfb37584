//! Agent runtime reached over a child process's stdin/stdout.
//!
//! Requests carry a numeric id and are matched to replies through a pending
//! map of oneshot senders. The runtime pushes `session.event` notifications
//! and issues `tool.call` requests back to us; tool calls are executed on
//! their own task so the reader keeps draining events meanwhile.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use runwatch_core::{
    AgentClient, AgentSession, ClientError, EventListener, RawEvent, SessionConfig, SessionId,
    Tool, ToolCallId, ToolContext, TurnId,
};

use crate::rpc::{self, Incoming};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pending request waiting for its reply.
type PendingTx = oneshot::Sender<Result<Value, ClientError>>;

/// How to launch and talk to the runtime process.
#[derive(Clone, Debug)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Exported to the child as `GITHUB_TOKEN`.
    pub github_token: Option<SecretString>,
    pub request_timeout: Duration,
    /// How long `stop` waits for the process to exit before killing it.
    pub stop_grace: Duration,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            command: "copilot".into(),
            args: vec!["--server".into(), "--stdio".into()],
            github_token: None,
            request_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// [`AgentClient`] speaking newline-delimited JSON-RPC 2.0.
pub struct StdioAgentClient {
    config: StdioConfig,
    transport: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    conn: RwLock<Option<Arc<Connection>>>,
}

impl StdioAgentClient {
    /// Client that spawns `config.command` on `start`.
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            conn: RwLock::new(None),
        }
    }

    /// Client bound to an already-open byte stream instead of a child process.
    pub fn with_transport<R, W>(config: StdioConfig, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            config,
            transport: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            conn: RwLock::new(None),
        }
    }

    fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        self.conn.read().clone().ok_or(ClientError::NotStarted)
    }

    fn spawn_child(&self) -> Result<Child, ClientError> {
        let mut cmd = Command::new(&self.config.command);
        let _ = cmd
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &self.config.github_token {
            let _ = cmd.env("GITHUB_TOKEN", token.expose_secret());
        }
        cmd.spawn()
            .map_err(|e| ClientError::Spawn(format!("{}: {e}", self.config.command)))
    }

    fn open_connection(&self) -> Result<Connection, ClientError> {
        let injected = self.transport.lock().take();
        if let Some((reader, writer)) = injected {
            return Ok(Connection::open(reader, writer, None, self.config.request_timeout));
        }

        let mut child = self.spawn_child()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Spawn("runtime stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Spawn("runtime stdout not captured".into()))?;
        let stderr = child.stderr.take();

        let conn = Connection::open(
            Box::new(stdout),
            Box::new(stdin),
            Some(child),
            self.config.request_timeout,
        );
        if let Some(stderr) = stderr {
            conn.tasks.lock().push(tokio::spawn(forward_stderr(stderr)));
        }
        Ok(conn)
    }
}

#[async_trait]
impl AgentClient for StdioAgentClient {
    async fn start(&self) -> Result<(), ClientError> {
        if self.conn.read().is_some() {
            return Ok(());
        }

        let conn = Arc::new(self.open_connection()?);
        if let Err(e) = conn.request("ping", json!({})).await {
            warn!(error = %e, kind = e.error_kind(), "agent runtime did not answer ping");
            conn.close(self.config.stop_grace).await;
            return Err(e);
        }

        info!(command = %self.config.command, "agent runtime connected");
        *self.conn.write() = Some(conn);
        Ok(())
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Box<dyn AgentSession>, ClientError> {
        let conn = self.connection()?;

        let tools: Vec<_> = config.tools.iter().map(|t| t.to_definition()).collect();
        let mut params = json!({
            "agentMode": config.agent_mode,
            "tools": tools,
        });
        if let Some(model) = &config.model {
            params["model"] = json!(model);
        }

        let result = conn.request("session.create", params).await?;
        let id = rpc::require_str(&result, "sessionId")
            .map(SessionId::from_raw)
            .map_err(ClientError::Protocol)?;

        let route = Arc::new(SessionRoute::new(&config.tools));
        let _ = conn.shared.routes.insert(id.clone(), Arc::clone(&route));
        debug!(session_id = %id, tools = config.tools.len(), "session created");

        Ok(Box::new(StdioSession { id, route, conn }))
    }

    async fn stop(&self) -> Result<(), ClientError> {
        let conn = self.conn.write().take();
        let Some(conn) = conn else {
            return Ok(());
        };

        let result = match conn.request("shutdown", json!({})).await {
            Ok(_) => Ok(()),
            // The runtime may exit before acknowledging.
            Err(e) if e.is_connection_lost() => Ok(()),
            Err(e) => Err(e),
        };
        conn.close(self.config.stop_grace).await;
        info!("agent runtime stopped");
        result
    }
}

struct StdioSession {
    id: SessionId,
    route: Arc<SessionRoute>,
    conn: Arc<Connection>,
}

#[async_trait]
impl AgentSession for StdioSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn on(&self, listener: EventListener) {
        self.route.listeners.write().push(listener);
    }

    async fn send(&self, prompt: &str) -> Result<TurnId, ClientError> {
        let result = self
            .conn
            .request("session.send", json!({ "sessionId": self.id, "prompt": prompt }))
            .await?;
        Ok(rpc::optional_str(&result, "turnId")
            .map(TurnId::from_raw)
            .unwrap_or_default())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        let result = self
            .conn
            .request("session.destroy", json!({ "sessionId": self.id }))
            .await;
        self.route.cancel.cancel();
        let _ = self.conn.shared.routes.remove(&self.id);
        result.map(|_| ())
    }
}

/// Listeners and tools of one session.
struct SessionRoute {
    listeners: RwLock<Vec<EventListener>>,
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Cancelled on destroy or disconnect; in-flight tool calls see it.
    cancel: CancellationToken,
}

impl SessionRoute {
    fn new(tools: &[Arc<dyn Tool>]) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            tools: tools
                .iter()
                .map(|t| (t.name().to_string(), Arc::clone(t)))
                .collect(),
            cancel: CancellationToken::new(),
        }
    }

    fn emit(&self, event: &RawEvent) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener(event);
        }
    }
}

/// State shared between the client handle and the reader task.
struct Shared {
    outgoing: mpsc::UnboundedSender<String>,
    pending: DashMap<u64, PendingTx>,
    routes: DashMap<SessionId, Arc<SessionRoute>>,
    closed: AtomicBool,
}

impl Shared {
    fn send_line(&self, line: String) {
        if self.outgoing.send(line).is_err() {
            debug!("runtime writer closed, dropping message");
        }
    }

    fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(ClientError::Disconnected));
            }
        }
        for route in self.routes.iter() {
            route.cancel.cancel();
        }
    }

    fn dispatch(self: &Arc<Self>, line: &str) {
        match rpc::parse_incoming(line) {
            Err(e) => warn!(code = e.code, error = %e.message, "discarding malformed runtime message"),
            Ok(Incoming::Response { id, result }) => match self.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(result.map_err(|e| ClientError::Rpc {
                        code: e.code,
                        message: e.message,
                    }));
                }
                None => debug!(id, "reply for unknown or expired request"),
            },
            Ok(Incoming::Notification { method, params }) => {
                if method == "session.event" {
                    self.deliver_event(&params);
                } else {
                    debug!(method = %method, "ignoring runtime notification");
                }
            }
            Ok(Incoming::Request { id, method, params }) => {
                if method == "tool.call" {
                    self.handle_tool_call(id, &params);
                } else {
                    warn!(method = %method, "unsupported runtime request");
                    self.send_line(rpc::method_not_found(&id, &method));
                }
            }
        }
    }

    fn deliver_event(&self, params: &Value) {
        let Some(session_id) = rpc::optional_str(params, "sessionId") else {
            warn!("session.event without sessionId");
            return;
        };
        let event: RawEvent = match serde_json::from_value(params["event"].clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id, error = %e, "undecodable session event");
                return;
            }
        };
        let route = self
            .routes
            .get(&SessionId::from_raw(session_id))
            .map(|r| Arc::clone(r.value()));
        match route {
            Some(route) => route.emit(&event),
            None => debug!(session_id, event_type = %event.event_type, "event for unknown session"),
        }
    }

    fn handle_tool_call(self: &Arc<Self>, id: Value, params: &Value) {
        let (session_id, tool_name) = match (
            rpc::require_str(params, "sessionId"),
            rpc::require_str(params, "toolName"),
        ) {
            (Ok(s), Ok(t)) => (SessionId::from_raw(s), t.to_string()),
            (Err(msg), _) | (_, Err(msg)) => {
                self.send_line(rpc::encode_error(&id, rpc::INVALID_PARAMS, msg));
                return;
            }
        };
        let found = self.routes.get(&session_id).and_then(|r| {
            r.tools
                .get(&tool_name)
                .map(|t| (Arc::clone(t), r.cancel.child_token()))
        });
        let Some((tool, abort)) = found else {
            warn!(tool = %tool_name, "runtime called an unregistered tool");
            self.send_line(rpc::encode_error(
                &id,
                rpc::INVALID_PARAMS,
                format!("unknown tool: {tool_name}"),
            ));
            return;
        };

        let call_id = rpc::optional_str(params, "toolCallId")
            .map(ToolCallId::from_raw)
            .unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let shared = Arc::clone(self);
        drop(tokio::spawn(async move {
            let ctx = ToolContext::new(session_id, call_id).with_abort_signal(abort);
            let line = match tool.execute(arguments, &ctx).await {
                Ok(result) => {
                    debug!(tool = %tool_name, is_error = result.is_error, "tool call answered");
                    rpc::encode_result(&id, Value::String(result.content))
                }
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "tool call failed");
                    rpc::encode_error(&id, rpc::INTERNAL_ERROR, e.to_string())
                }
            };
            shared.send_line(line);
        }));
    }
}

/// One live link to the runtime: reader and writer tasks plus the child.
struct Connection {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    fn open(
        reader: BoxedReader,
        writer: BoxedWriter,
        child: Option<Child>,
        request_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outgoing: tx,
            pending: DashMap::new(),
            routes: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let tasks = vec![
            tokio::spawn(writer_loop(writer, rx)),
            tokio::spawn(reader_loop(reader, Arc::clone(&shared))),
        ];
        Self {
            shared,
            next_id: AtomicU64::new(1),
            request_timeout,
            child: Mutex::new(child),
            tasks: Mutex::new(tasks),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Disconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.pending.insert(id, tx);

        // The reader may have hit EOF between the check above and the insert.
        if self.shared.closed.load(Ordering::SeqCst)
            || self
                .shared
                .outgoing
                .send(rpc::encode_request(id, method, &params))
                .is_err()
        {
            let _ = self.shared.pending.remove(&id);
            return Err(ClientError::Disconnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                let _ = self.shared.pending.remove(&id);
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout: self.request_timeout,
                })
            }
        }
    }

    async fn close(&self, grace: Duration) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.fail_pending();

        let child = self.child.lock().take();
        let Some(mut child) = child else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "agent runtime exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to wait for agent runtime"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "agent runtime did not exit, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill agent runtime");
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn writer_loop(mut writer: BoxedWriter, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "failed to write to agent runtime");
            break;
        }
    }
}

async fn reader_loop(reader: BoxedReader, shared: Arc<Shared>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    shared.dispatch(&line);
                }
            }
            Ok(None) => {
                debug!("agent runtime closed its output");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read from agent runtime");
                break;
            }
        }
    }
    shared.fail_pending();
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "runwatch_runtime::stderr", "{line}");
    }
}
