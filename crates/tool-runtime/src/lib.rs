//! Tool aggregation and execution on top of `toolwire-mcp` transports.
//!
//! - `ToolRegistry` discovers tools from registered servers and keeps one
//!   name-keyed table, backed by a TTL `ToolCache`
//! - `ToolExecutor` validates arguments against each tool's JSON Schema and
//!   dispatches `tools/call`
//! - `ToolHub` is the facade an application embeds: it builds transports
//!   from configuration, survives partial startup and re-discovers tools
//!   when servers announce changes

pub mod cache;
pub mod executor;
pub mod hub;
pub mod registry;
pub mod schema;
pub mod tool;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cache::ToolCache;
pub use executor::{format_result, ExecuteError, ExecuteResult, ToolExecutor};
pub use hub::{HubError, ServerInfo, ToolHub};
pub use registry::{RegisteredServer, RegistryError, ToolRegistry};
pub use schema::{Schema, SchemaError, ValidationError};
pub use tool::Tool;
