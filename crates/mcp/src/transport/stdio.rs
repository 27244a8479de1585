//! Subprocess transport: newline-delimited JSON over a child's stdio.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use toolwire_core::{ConfigError, Logger, RuntimeConfig, ServerConfig, TransportKind};
use toolwire_notify::{NotificationBus, ServerStatus};

use super::{initialize_params, into_result, route_notification, ConnectionState, McpTransport, StateCell};
use crate::cancel::CancelSignal;
use crate::correlation::PendingRequests;
use crate::error::McpError;
use crate::types::{error_codes, methods, InitializeResult, JsonRpcMessage, MessageKind};

/// How long a server gets to exit after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);
/// How long reader tasks get to drain after the process is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

struct ServerProcess {
    child: Child,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// Talks to a tool server running as a child process.
pub struct StdioTransport {
    config: ServerConfig,
    runtime: RuntimeConfig,
    timeout: Duration,
    state: Arc<StateCell>,
    pending: Arc<PendingRequests>,
    stdin: SharedStdin,
    /// Serializes connect/disconnect and owns the process.
    lifecycle: Mutex<Option<ServerProcess>>,
    bus: NotificationBus,
    log: Logger,
}

impl StdioTransport {
    pub fn new(config: ServerConfig, runtime: &RuntimeConfig, bus: NotificationBus, log: Logger) -> Self {
        let timeout = runtime.timeout_for(&config);
        let log = log.for_server(&config.name);
        Self {
            config,
            runtime: runtime.clone(),
            timeout,
            state: Arc::new(StateCell::new()),
            pending: Arc::new(PendingRequests::new()),
            stdin: Arc::new(Mutex::new(None)),
            lifecycle: Mutex::new(None),
            bus,
            log,
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn command(&self) -> Result<&str, McpError> {
        self.config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingCommand {
                    server: self.config.name.clone(),
                }
                .into()
            })
    }

    /// Spawn the process, start readers, run the handshake.
    async fn start(&self, slot: &mut Option<ServerProcess>) -> Result<(), McpError> {
        let command = self.command()?;
        tracing::info!(
            parent: self.log.span(),
            command = %command,
            args = ?self.config.args,
            "Spawning server process"
        );

        let mut child = Command::new(command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                server: self.config.name.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture server stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture server stderr".to_string()))?;

        *self.stdin.lock().await = Some(stdin);

        let inbound = Inbound {
            server: self.config.name.clone(),
            pending: Arc::clone(&self.pending),
            state: Arc::clone(&self.state),
            stdin: Arc::clone(&self.stdin),
            bus: self.bus.clone(),
            log: self.log.clone(),
        };
        let stdout_task = tokio::spawn(inbound.run(stdout));
        let stderr_task = tokio::spawn(log_stderr(self.log.clone(), stderr));
        *slot = Some(ServerProcess {
            child,
            stdout_task,
            stderr_task,
        });

        let params = initialize_params(&self.runtime)?;
        let result = self
            .exchange(methods::INITIALIZE, Some(params), &CancelSignal::never())
            .await
            .map_err(|e| McpError::handshake(&self.config.name, e))?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            McpError::handshake(&self.config.name, McpError::InvalidResponse(e.to_string()))
        })?;

        write_message(&self.stdin, &JsonRpcMessage::notification(methods::INITIALIZED, None))
            .await
            .map_err(|e| McpError::handshake(&self.config.name, e))?;

        tracing::info!(
            parent: self.log.span(),
            protocol = %init.protocol_version,
            server_info = ?init.server_info.as_ref().map(|s| s.name.as_str()),
            "Handshake complete"
        );
        Ok(())
    }

    /// Correlated request without the connected-state check. Used by the
    /// handshake while still `Connecting`.
    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelSignal,
    ) -> Result<Value, McpError> {
        let slot = self.pending.register();
        let message = JsonRpcMessage::request(slot.id().clone(), method, params);
        tracing::debug!(parent: self.log.span(), method = %method, id = %slot.id(), "Sending request");

        tokio::time::timeout(self.timeout, write_message(&self.stdin, &message))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                timeout: self.timeout,
            })??;

        let response = slot.wait(method, self.timeout, cancel).await?;
        into_result(response)
    }

    /// Close stdin, give the process a grace period, then kill it.
    async fn stop_process(&self, mut process: ServerProcess) {
        self.stdin.lock().await.take();

        let exited = tokio::time::timeout(EXIT_GRACE, process.child.wait()).await;
        match exited {
            Ok(Ok(status)) => {
                tracing::debug!(parent: self.log.span(), %status, "Server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(parent: self.log.span(), error = %e, "Failed to wait for server process");
            }
            Err(_) => {
                tracing::warn!(parent: self.log.span(), "Server did not exit in time, killing");
                if let Err(e) = process.child.kill().await {
                    tracing::warn!(parent: self.log.span(), error = %e, "Failed to kill server process");
                }
            }
        }

        // A grandchild may still hold the pipes open.
        for task in [&mut process.stdout_task, &mut process.stderr_task] {
            if tokio::time::timeout(READER_GRACE, &mut *task).await.is_err() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn server_name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self) -> Result<(), McpError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state.get() == ConnectionState::Connected {
            return Ok(());
        }

        // Left over from a process that exited on its own.
        if let Some(stale) = lifecycle.take() {
            self.stop_process(stale).await;
        }

        self.state.set(ConnectionState::Connecting);
        match self.start(&mut lifecycle).await {
            Ok(()) => {
                self.state.set(ConnectionState::Connected);
                tracing::info!(parent: self.log.span(), "Connected");
                self.bus
                    .notify_server_status(&self.config.name, ServerStatus::Connected, None);
                Ok(())
            }
            Err(e) => {
                if let Some(process) = lifecycle.take() {
                    self.stop_process(process).await;
                }
                self.pending.clear();
                self.state.set(ConnectionState::Disconnected);
                tracing::error!(parent: self.log.span(), error = %e, "Connect failed");
                self.bus.notify_server_status(
                    &self.config.name,
                    ServerStatus::Error,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = self.state.swap(ConnectionState::Disconnected);
        let process = lifecycle.take();
        if process.is_none() && previous == ConnectionState::Disconnected {
            return;
        }

        if let Some(process) = process {
            self.stop_process(process).await;
        }
        let failed = self.pending.clear();
        tracing::info!(parent: self.log.span(), failed_requests = failed, "Disconnected");

        if previous == ConnectionState::Connected {
            self.bus
                .notify_server_status(&self.config.name, ServerStatus::Disconnected, None);
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelSignal,
    ) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.config.name.clone()));
        }
        self.exchange(method, params, cancel).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.config.name.clone()));
        }
        write_message(&self.stdin, &JsonRpcMessage::notification(method, params)).await
    }
}

async fn write_message(stdin: &Mutex<Option<ChildStdin>>, message: &JsonRpcMessage) -> Result<(), McpError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');

    let mut guard = stdin.lock().await;
    let pipe = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
    pipe.write_all(line.as_bytes()).await?;
    pipe.flush().await?;
    Ok(())
}

/// State the stdout reader task needs.
struct Inbound {
    server: String,
    pending: Arc<PendingRequests>,
    state: Arc<StateCell>,
    stdin: SharedStdin,
    bus: NotificationBus,
    log: Logger,
}

impl Inbound {
    /// Read until the pipe closes.
    async fn run<R: AsyncRead + Unpin>(self, stdout: R) {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    self.handle_line(line.trim()).await;
                }
                Err(e) => {
                    tracing::warn!(parent: self.log.span(), error = %e, "Failed to read server output");
                    break;
                }
            }
        }
        self.closed().await;
    }

    async fn handle_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }

        let message: JsonRpcMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    parent: self.log.span(),
                    error = %e,
                    line = %truncate(line, 200),
                    "Skipping malformed line"
                );
                return;
            }
        };

        match message.kind() {
            MessageKind::Response => {
                let id = message.id.clone();
                if !self.pending.complete(message) {
                    tracing::debug!(
                        parent: self.log.span(),
                        id = ?id,
                        "Discarding response with no waiting request"
                    );
                }
            }
            MessageKind::Notification => {
                route_notification(&self.bus, &self.server, &self.log, message);
            }
            MessageKind::Request => self.answer(message).await,
            MessageKind::Invalid => {
                tracing::warn!(parent: self.log.span(), "Skipping message without id or method");
            }
        }
    }

    /// Reply to a server-initiated request.
    async fn answer(&self, request: JsonRpcMessage) {
        let (Some(id), Some(method)) = (request.id, request.method) else {
            return;
        };
        let reply = if method == methods::PING {
            JsonRpcMessage::success(id, json!({}))
        } else {
            tracing::debug!(parent: self.log.span(), method = %method, "Rejecting server request");
            JsonRpcMessage::failure(id, error_codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
        };
        if let Err(e) = write_message(&self.stdin, &reply).await {
            tracing::warn!(parent: self.log.span(), error = %e, "Failed to answer server request");
        }
    }

    async fn closed(&self) {
        self.stdin.lock().await.take();
        let failed = self.pending.clear();
        if self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Disconnected)
        {
            tracing::warn!(
                parent: self.log.span(),
                failed_requests = failed,
                "Server closed its output"
            );
            self.bus.notify_server_status(
                &self.server,
                ServerStatus::Disconnected,
                Some("server process exited"),
            );
        }
    }
}

async fn log_stderr<R: AsyncRead + Unpin>(log: Logger, stderr: R) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::info!(parent: log.span(), line = %line, "Server stderr");
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn server_stderr_shows_at_default_level() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        log_stderr(Logger::component("stdio"), &b"fatal: index out of range\n\n"[..]).await;

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Server stderr"));
        assert!(output.contains("fatal: index out of range"));
        assert_eq!(output.matches("Server stderr").count(), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 50), "short");
    }

    #[tokio::test]
    async fn connect_without_command_is_config_error() {
        let mut config = ServerConfig::stdio("fs", "", Vec::<String>::new());
        config.command = None;
        let transport = StdioTransport::new(
            config,
            &RuntimeConfig::default(),
            NotificationBus::new(Logger::disabled()),
            Logger::disabled(),
        );
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Config(ConfigError::MissingCommand { .. })));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let transport = StdioTransport::new(
            ServerConfig::stdio("ghost", "/nonexistent/toolwire-server", Vec::<String>::new()),
            &RuntimeConfig::default(),
            NotificationBus::new(Logger::disabled()),
            Logger::disabled(),
        );
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Spawn { .. }));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn request_before_connect_is_rejected() {
        let transport = StdioTransport::new(
            ServerConfig::stdio("fs", "cat", Vec::<String>::new()),
            &RuntimeConfig::default(),
            NotificationBus::new(Logger::disabled()),
            Logger::disabled(),
        );
        let err = transport
            .request(methods::PING, None, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected(name) if name == "fs"));
        // Disconnecting a transport that never connected is a no-op.
        transport.disconnect().await;
    }
}
