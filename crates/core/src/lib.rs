//! Shared building blocks for the toolwire crates: server and runtime
//! configuration, configuration errors, and the injected logging handle.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{load_dotenv, parse_servers_toml, RuntimeConfig, ServerConfig, TransportKind};
pub use error::ConfigError;
pub use logging::Logger;
