//! Validated tool dispatch.
//!
//! Resolves a tool by name, checks the arguments against its schema,
//! reconnects the owning transport when needed and issues `tools/call`.
//! Call failures are part of the [`ExecuteResult`]; only failures that
//! happen before dispatch are returned as [`ExecuteError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use toolwire_core::Logger;
use toolwire_mcp::{CancelSignal, McpError, ToolResult};

use crate::registry::ToolRegistry;
use crate::schema::ValidationError;
use crate::tool::Tool;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments for '{tool}': {source}")]
    Validation {
        tool: String,
        #[source]
        source: ValidationError,
    },

    /// The tool table names a server that is no longer registered.
    #[error("Server '{server}' for tool '{tool}' is not registered")]
    ServerMissing { tool: String, server: String },

    #[error("Failed to reconnect to '{server}': {source}")]
    Reconnect {
        server: String,
        #[source]
        source: McpError,
    },
}

/// Outcome of one dispatched call.
#[derive(Debug)]
pub struct ExecuteResult {
    pub tool: Arc<Tool>,
    pub outcome: Result<ToolResult, McpError>,
    pub elapsed: Duration,
}

impl ExecuteResult {
    /// The call completed and the server did not flag it as an error.
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, Ok(result) if !result.is_error)
    }

    /// Human-readable rendering of the outcome.
    pub fn display_text(&self) -> String {
        match &self.outcome {
            Ok(result) => format_result(result),
            Err(e) => format!("Error: {e}"),
        }
    }
}

/// Render a tool result as text: the first text item, else the first JSON
/// item, else structured content, else a placeholder naming the first
/// content type.
pub fn format_result(result: &ToolResult) -> String {
    if let Some(text) = result.first_text() {
        return text.to_string();
    }

    if let Some(item) = result.content.iter().find(|c| c.is_json()) {
        let value = item
            .data
            .clone()
            .or_else(|| item.text.clone().map(Value::String))
            .unwrap_or(Value::Null);
        return pretty(&value);
    }

    if let Some(structured) = &result.structured_content {
        return pretty(structured);
    }

    match result.content.first() {
        Some(item) => format!("[{} content]", item.content_type),
        None => "(no output)".to_string(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    log: Logger,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, log: Logger) -> Self {
        Self { registry, log }
    }

    /// Execute `tool_name` with `args`. A `null` argument value is sent as an
    /// empty object.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        cancel: &CancelSignal,
    ) -> Result<ExecuteResult, ExecuteError> {
        let tool = self
            .registry
            .get_tool(tool_name)
            .await
            .ok_or_else(|| ExecuteError::ToolNotFound(tool_name.to_string()))?;

        let args = if args.is_null() {
            Value::Object(Map::new())
        } else {
            args
        };

        tool.validate(&args).map_err(|source| ExecuteError::Validation {
            tool: tool.name.clone(),
            source,
        })?;

        let transport = self
            .registry
            .get_server(&tool.server)
            .await
            .ok_or_else(|| ExecuteError::ServerMissing {
                tool: tool.name.clone(),
                server: tool.server.clone(),
            })?;

        if !transport.is_connected() {
            tracing::info!(parent: self.log.span(), server = %tool.server, "Reconnecting before tool call");
            transport
                .connect()
                .await
                .map_err(|source| ExecuteError::Reconnect {
                    server: tool.server.clone(),
                    source,
                })?;
        }

        let started = Instant::now();
        let outcome = transport.call_tool(&tool.name, args, cancel).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(result) => tracing::info!(
                parent: self.log.span(),
                tool = %tool,
                is_error = result.is_error,
                elapsed_ms = elapsed.as_millis() as u64,
                "Tool call completed"
            ),
            Err(e) => tracing::warn!(
                parent: self.log.span(),
                tool = %tool,
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Tool call failed"
            ),
        }

        Ok(ExecuteResult {
            tool,
            outcome,
            elapsed,
        })
    }
}
