//! MCP transport layer.
//!
//! Defines the [`McpTransport`] trait shared by the subprocess and HTTP
//! transports, plus the helpers both use: connection state, handshake
//! parameters, response unpacking and notification routing.

mod http;
mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use toolwire_core::{Logger, RuntimeConfig, ServerConfig, TransportKind};
use toolwire_notify::{NotificationBus, ORIGIN_SERVER};

use crate::cancel::CancelSignal;
use crate::error::McpError;
use crate::types::{
    methods, CallToolParams, ClientCapabilities, ClientInfo, InitializeParams, JsonRpcMessage,
    ListToolsParams, ListToolsResult, ToolInfo, ToolResult,
};

/// Upper bound on `tools/list` pages followed for one discovery.
const MAX_TOOL_PAGES: usize = 64;

/// Connection to one tool server.
///
/// `request` blocks until the correlated response arrives, the configured
/// timeout elapses, or `cancel` fires. `connect` and `disconnect` are
/// idempotent; `disconnect` is best-effort and never fails.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn server_name(&self) -> &str;

    fn kind(&self) -> TransportKind;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn connect(&self) -> Result<(), McpError>;

    async fn disconnect(&self);

    /// Send a request and return its `result` payload. A JSON-RPC error
    /// object comes back as [`McpError::Protocol`].
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelSignal,
    ) -> Result<Value, McpError>;

    /// Send a notification. No response is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Enumerate every tool, following `nextCursor` pages.
    async fn list_tools(&self, cancel: &CancelSignal) -> Result<Vec<ToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match cursor.take() {
                Some(cursor) => Some(serde_json::to_value(ListToolsParams {
                    cursor: Some(cursor),
                })?),
                None => None,
            };
            let value = self.request(methods::TOOLS_LIST, params, cancel).await?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| McpError::InvalidResponse(format!("tools/list: {e}")))?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        Err(McpError::InvalidResponse(format!(
            "tools/list did not finish within {MAX_TOOL_PAGES} pages"
        )))
    }

    /// Invoke a tool. A JSON-RPC error object from the server becomes an
    /// error-flagged result rather than an `Err`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancelSignal,
    ) -> Result<ToolResult, McpError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        match self.request(methods::TOOLS_CALL, Some(params), cancel).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| McpError::InvalidResponse(format!("tools/call: {e}"))),
            Err(McpError::Protocol(error)) => Ok(ToolResult::error_text(error.message)),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self, cancel: &CancelSignal) -> Result<(), McpError> {
        self.request(methods::PING, None, cancel).await.map(|_| ())
    }
}

/// Build the transport a server configuration asks for. The configuration
/// is validated first; nothing is spawned or contacted until `connect`.
pub fn build_transport(
    config: ServerConfig,
    runtime: &RuntimeConfig,
    bus: NotificationBus,
    log: Logger,
) -> Result<Arc<dyn McpTransport>, McpError> {
    config.validate()?;
    let transport: Arc<dyn McpTransport> = match config.transport {
        TransportKind::Stdio => Arc::new(StdioTransport::new(config, runtime, bus, log)),
        TransportKind::Http => Arc::new(HttpTransport::new(config, runtime, bus, log)?),
    };
    Ok(transport)
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of a transport: `Disconnected → Connecting → Connected →
/// Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Atomic cell readable without taking the lifecycle lock.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move `from → to`; false if the state was something else.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

pub(crate) fn initialize_params(runtime: &RuntimeConfig) -> Result<Value, McpError> {
    let params = InitializeParams {
        protocol_version: runtime.protocol_version.clone(),
        capabilities: ClientCapabilities::default(),
        client_info: ClientInfo {
            name: runtime.client_name.clone(),
            version: runtime.client_version.clone(),
        },
    };
    Ok(serde_json::to_value(params)?)
}

/// Unpack a response envelope into its result payload.
pub(crate) fn into_result(message: JsonRpcMessage) -> Result<Value, McpError> {
    if let Some(error) = message.error {
        return Err(McpError::Protocol(error));
    }
    message
        .result
        .ok_or_else(|| McpError::InvalidResponse("response carries neither result nor error".to_string()))
}

/// Map an inbound protocol notification onto the bus.
pub(crate) fn route_notification(
    bus: &NotificationBus,
    server: &str,
    log: &Logger,
    message: JsonRpcMessage,
) {
    let method = message.method.as_deref().unwrap_or_default();
    match method {
        methods::TOOLS_LIST_CHANGED => {
            tracing::info!(parent: log.span(), "Server reported tool list change");
            bus.notify_tool_list_changed(server, ORIGIN_SERVER, None);
        }
        methods::RESOURCES_UPDATED | methods::RESOURCES_LIST_CHANGED => {
            bus.notify_resource_change(server, message.params);
        }
        methods::PROGRESS => bus.notify_progress(server, message.params),
        methods::LOG_MESSAGE => {
            tracing::debug!(parent: log.span(), params = ?message.params, "Server log message");
        }
        other => {
            tracing::debug!(parent: log.span(), method = %other, "Ignoring unhandled notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{error_codes, RpcId};
    use serde_json::json;
    use std::sync::Mutex;
    use toolwire_notify::NotificationKind;

    #[test]
    fn state_cell_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        assert!(!cell.transition(ConnectionState::Connected, ConnectionState::Disconnected));
        cell.set(ConnectionState::Connected);
        assert!(cell.transition(ConnectionState::Connected, ConnectionState::Disconnected));
        assert_eq!(cell.swap(ConnectionState::Connecting), ConnectionState::Disconnected);
        assert_eq!(cell.get().to_string(), "connecting");
    }

    #[test]
    fn into_result_splits_outcomes() {
        let ok = JsonRpcMessage::success(RpcId::Number(1), json!({"tools": []}));
        assert_eq!(into_result(ok).unwrap(), json!({"tools": []}));

        let err = JsonRpcMessage::failure(RpcId::Number(2), error_codes::METHOD_NOT_FOUND, "nope");
        assert!(into_result(err).unwrap_err().is_protocol());

        let mut empty = JsonRpcMessage::success(RpcId::Number(3), json!(null));
        empty.result = None;
        assert!(matches!(into_result(empty), Err(McpError::InvalidResponse(_))));
    }

    #[test]
    fn initialize_params_use_runtime_identity() {
        let runtime = RuntimeConfig::default();
        let params = initialize_params(&runtime).unwrap();
        assert_eq!(params["protocolVersion"], runtime.protocol_version);
        assert_eq!(params["clientInfo"]["name"], "toolwire");
        assert!(params["capabilities"].is_object());
    }

    #[test]
    fn notifications_map_to_bus_kinds() {
        let bus = NotificationBus::new(Logger::disabled());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_fn(move |n| sink.lock().unwrap().push((n.kind, n.origin().map(String::from))));

        let log = Logger::disabled();
        for method in [
            methods::TOOLS_LIST_CHANGED,
            methods::RESOURCES_UPDATED,
            methods::PROGRESS,
            "notifications/unknown",
        ] {
            route_notification(&bus, "fs", &log, JsonRpcMessage::notification(method, None));
        }

        // No runtime here, so delivery is inline.
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (NotificationKind::ToolListChanged, Some(ORIGIN_SERVER.to_string())),
                (NotificationKind::ResourceUpdate, None),
                (NotificationKind::Progress, None),
            ]
        );
    }

    #[test]
    fn build_transport_rejects_bad_config() {
        let bus = NotificationBus::new(Logger::disabled());
        let runtime = RuntimeConfig::default();
        let err = build_transport(
            ServerConfig::http("remote", "not a url"),
            &runtime,
            bus.clone(),
            Logger::disabled(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, McpError::Config(_)));

        let stdio = build_transport(
            ServerConfig::stdio("fs", "mcp-fs", Vec::<String>::new()),
            &runtime,
            bus,
            Logger::disabled(),
        )
        .unwrap();
        assert_eq!(stdio.kind(), TransportKind::Stdio);
        assert!(!stdio.is_connected());
    }
}
