use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocol revision sent in the `initialize` handshake and the HTTP
/// version header unless overridden.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read a profiled key: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
fn profiled_opt<F>(lookup: &F, profile: &str, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

fn profiled_or<F>(lookup: &F, profile: &str, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    profiled_opt(lookup, profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_parse<F, T>(lookup: &F, profile: &str, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match profiled_opt(lookup, profile, key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

// ── Runtime ───────────────────────────────────────────────────

/// Process-wide defaults shared by every transport, the cache and the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Default wait for a correlated response when a server sets none.
    pub request_timeout: Duration,
    /// Lifetime of a tool cache entry.
    pub cache_ttl: Duration,
    pub client_name: String,
    pub client_version: String,
    pub protocol_version: String,
    /// Size of the recent-notification ring buffer.
    pub history_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            client_name: "toolwire".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TOOLWIRE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| env::var(key).ok();
        let profile = profiled_or(&lookup, "", "TOOLWIRE_PROFILE", "").to_uppercase();
        Self::from_lookup(&profile, lookup)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(profile: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let defaults = Self::default();

        let timeout_ms = profiled_parse(&lookup, p, "TOOLWIRE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        let ttl_secs = profiled_parse(&lookup, p, "TOOLWIRE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TOOLWIRE_REQUEST_TIMEOUT_MS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            profile: p.to_string(),
            request_timeout: Duration::from_millis(timeout_ms),
            cache_ttl: Duration::from_secs(ttl_secs),
            client_name: profiled_or(&lookup, p, "TOOLWIRE_CLIENT_NAME", &defaults.client_name),
            client_version: defaults.client_version,
            protocol_version: profiled_or(
                &lookup,
                p,
                "TOOLWIRE_PROTOCOL_VERSION",
                DEFAULT_PROTOCOL_VERSION,
            ),
            history_capacity: profiled_parse(
                &lookup,
                p,
                "TOOLWIRE_HISTORY_CAPACITY",
                DEFAULT_HISTORY_CAPACITY,
            )?,
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Timeout for one server: its own override, else the runtime default.
    pub fn timeout_for(&self, server: &ServerConfig) -> Duration {
        server.timeout().unwrap_or(self.request_timeout)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  client:    {} {}", self.client_name, self.client_version);
        tracing::info!("  protocol:  {}", self.protocol_version);
        tracing::info!("  timeout:   {}ms", self.request_timeout.as_millis());
        tracing::info!("  cache ttl: {}s", self.cache_ttl.as_secs());
    }
}

// ── Servers ───────────────────────────────────────────────────

/// How a tool server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            other => Err(ConfigError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// One tool server, as handed over by the configuration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Merged over the current process environment when spawning.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Static headers sent with every HTTP request (e.g. bearer tokens).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ServerConfig {
    /// A subprocess server.
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            timeout_ms: None,
        }
    }

    /// An HTTP server.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Http,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
            timeout_ms: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Check the fields the configured transport needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: format!("servers.{}.timeout_ms", self.name),
                value: "0".to_string(),
            });
        }

        match self.transport {
            TransportKind::Stdio => {
                let has_command = self
                    .command
                    .as_deref()
                    .is_some_and(|c| !c.trim().is_empty());
                if !has_command {
                    return Err(ConfigError::MissingCommand {
                        server: self.name.clone(),
                    });
                }
            }
            TransportKind::Http => {
                let raw = self
                    .url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingUrl {
                        server: self.name.clone(),
                    })?;
                let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
                    server: self.name.clone(),
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidUrl {
                        server: self.name.clone(),
                        url: raw.to_string(),
                        reason: format!("unsupported scheme '{}'", parsed.scheme()),
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// Parse a `[[servers]]` TOML document. Entries are not validated here so a
/// single bad server can be reported without rejecting the rest.
pub fn parse_servers_toml(source: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let file: ServersFile = toml::from_str(source)?;
    Ok(file.servers)
}
