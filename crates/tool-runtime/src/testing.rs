//! In-memory transport for exercising the registry, executor and hub
//! without spawning processes. Enabled for tests and by the `test-utils`
//! feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use toolwire_core::TransportKind;
use toolwire_mcp::{
    error_codes, methods, CancelSignal, ConnectionState, JsonRpcError, McpError, McpTransport, ToolInfo,
    ToolResult,
};

/// Scriptable [`McpTransport`]. Tools answer `"<name> ok"` unless a response
/// was set for them.
pub struct MockTransport {
    name: String,
    connected: AtomicBool,
    tools: Mutex<Vec<ToolInfo>>,
    responses: Mutex<HashMap<String, Result<ToolResult, String>>>,
    calls: Mutex<Vec<(String, Value)>>,
    fail_connect: AtomicBool,
    fail_discovery: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connected: AtomicBool::new(false),
            tools: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            fail_discovery: AtomicBool::new(false),
            list_delay: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn add_tool(&self, name: &str, input_schema: Value) {
        lock(&self.tools).push(ToolInfo {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: Some(input_schema),
        });
    }

    /// Replace the advertised tools with schema-less ones.
    pub fn set_tools(&self, names: &[&str]) {
        *lock(&self.tools) = names
            .iter()
            .map(|name| ToolInfo {
                name: name.to_string(),
                description: None,
                input_schema: None,
            })
            .collect();
    }

    pub fn set_response(&self, tool: &str, result: ToolResult) {
        lock(&self.responses).insert(tool.to_string(), Ok(result));
    }

    /// Make calls to `tool` fail at the transport level.
    pub fn set_transport_failure(&self, tool: &str, message: &str) {
        lock(&self.responses).insert(tool.to_string(), Err(message.to_string()));
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *lock(&self.list_delay) = Some(delay);
    }

    /// Simulate the connection dropping.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpTransport for MockTransport {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn connect(&self) -> Result<(), McpError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(McpError::Transport("mock connect failure".to_string()));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        _cancel: &CancelSignal,
    ) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected(self.name.clone()));
        }

        match method {
            methods::TOOLS_LIST => {
                // Answer with the tools advertised when the request arrived,
                // even if they change during the delay.
                let tools = lock(&self.tools).clone();
                let delay = *lock(&self.list_delay);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail_discovery.load(Ordering::SeqCst) {
                    return Err(McpError::Transport("mock discovery failure".to_string()));
                }
                Ok(json!({ "tools": tools }))
            }
            methods::TOOLS_CALL => {
                let params = params.unwrap_or(Value::Null);
                let tool = params["name"].as_str().unwrap_or_default().to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                lock(&self.calls).push((tool.clone(), arguments));

                let scripted = lock(&self.responses).get(&tool).cloned();
                match scripted {
                    Some(Ok(result)) => Ok(serde_json::to_value(result)?),
                    Some(Err(message)) => Err(McpError::Transport(message)),
                    None => Ok(serde_json::to_value(ToolResult::text(format!("{tool} ok")))?),
                }
            }
            methods::PING => Ok(json!({})),
            other => Err(McpError::Protocol(JsonRpcError {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
                data: None,
            })),
        }
    }

    async fn notify(&self, _method: &str, _params: Option<Value>) -> Result<(), McpError> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
