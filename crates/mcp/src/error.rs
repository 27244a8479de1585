//! Error types for the MCP crate.

use std::time::Duration;

use toolwire_core::ConfigError;

use crate::types::JsonRpcError;

/// Errors that can occur while talking to a tool server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The server configuration is unusable. Raised before any I/O.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The server process could not be started.
    #[error("Failed to spawn server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// The `initialize` exchange failed.
    #[error("Handshake with '{server}' failed: {source}")]
    Handshake {
        server: String,
        #[source]
        source: Box<McpError>,
    },

    /// Writing to or reaching the server failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection went away while a response was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An operation needed a live connection and there was none.
    #[error("Server '{0}' is not connected")]
    NotConnected(String),

    /// The HTTP endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The server answered with a JSON-RPC error object.
    #[error("Server error {0}")]
    Protocol(JsonRpcError),

    /// No response arrived within the configured timeout.
    #[error("Request '{method}' timed out after {}ms", timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    /// The caller cancelled the wait.
    #[error("Request '{method}' was cancelled")]
    Cancelled { method: String },

    /// The response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Failed to encode or decode JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

impl McpError {
    /// The underlying error, unwrapping handshake context.
    pub fn root(&self) -> &McpError {
        match self {
            McpError::Handshake { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), McpError::Timeout { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self.root(), McpError::Protocol(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), McpError::Cancelled { .. })
    }

    /// The JSON-RPC error object, if the server sent one.
    pub fn protocol_error(&self) -> Option<&JsonRpcError> {
        match self.root() {
            McpError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn handshake(server: &str, source: McpError) -> Self {
        McpError::Handshake {
            server: server.to_string(),
            source: Box::new(source),
        }
    }
}
