//! MCP (Model Context Protocol) client transports.
//!
//! This crate speaks the JSON-RPC 2.0 envelope protocol to external tool
//! servers, either child processes over stdio or HTTP endpoints.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 envelope and MCP protocol types
//! - **correlation**: request id allocation and response routing
//! - **cancel**: caller-driven cancellation signals
//! - **transport**: the `McpTransport` trait with stdio and HTTP implementations
//! - **error**: unified error types
//!
//! # Usage
//!
//! ```no_run
//! use toolwire_core::{Logger, RuntimeConfig, ServerConfig};
//! use toolwire_mcp::{build_transport, CancelSignal};
//! use toolwire_notify::NotificationBus;
//!
//! # async fn example() -> Result<(), toolwire_mcp::McpError> {
//! let log = Logger::component("mcp");
//! let bus = NotificationBus::new(log.clone());
//! let config = ServerConfig::stdio("files", "mcp-files", ["--root", "/srv"]);
//! let transport = build_transport(config, &RuntimeConfig::default(), bus, log)?;
//! transport.connect().await?;
//! let tools = transport.list_tools(&CancelSignal::never()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod correlation;
pub mod error;
pub mod transport;
pub mod types;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use correlation::{PendingRequests, PendingSlot};
pub use error::McpError;
pub use transport::{build_transport, ConnectionState, HttpTransport, McpTransport, StdioTransport};
pub use types::*;
