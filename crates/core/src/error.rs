use thiserror::Error;

/// Configuration problems. Raised before any process or network I/O and
/// never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("server name must not be empty")]
    EmptyName,

    #[error("server '{server}' has no command configured")]
    MissingCommand { server: String },

    #[error("server '{server}' has no URL configured")]
    MissingUrl { server: String },

    #[error("server '{server}' has an invalid URL '{url}': {reason}")]
    InvalidUrl {
        server: String,
        url: String,
        reason: String,
    },

    #[error("unsupported transport kind: {0}")]
    UnsupportedTransport(String),

    #[error("server '{server}' has an invalid header '{header}'")]
    InvalidHeader { server: String, header: String },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("failed to parse server list: {0}")]
    Parse(#[from] toml::de::Error),
}
