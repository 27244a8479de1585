//! Aggregates tools across registered servers.
//!
//! One `tokio::sync::RwLock` guards both the server map and the tool table.
//! Discovery I/O runs outside the lock; its results are applied under the
//! write lock together with the matching cache writes, and only if the
//! transport that was queried is still the one registered.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;

use toolwire_core::{Logger, TransportKind};
use toolwire_mcp::{CancelSignal, ConnectionState, McpError, McpTransport};
use toolwire_notify::{NotificationBus, ORIGIN_REGISTRY};

use crate::cache::ToolCache;
use crate::tool::Tool;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid server name: '{0}'")]
    InvalidName(String),

    #[error("Server '{0}' is already registered")]
    DuplicateServer(String),

    #[error("Server '{0}' is not registered")]
    ServerNotFound(String),

    #[error("Tool discovery failed for '{server}': {source}")]
    Discovery {
        server: String,
        #[source]
        source: McpError,
    },

    #[error("{failed} of {total} servers failed to refresh: {}", .details.join("; "))]
    RefreshFailed {
        failed: usize,
        total: usize,
        details: Vec<String>,
    },
}

struct ServerEntry {
    transport: Arc<dyn McpTransport>,
    last_error: Option<String>,
    refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RegistryState {
    servers: HashMap<String, ServerEntry>,
    tools: HashMap<String, Arc<Tool>>,
}

/// Point-in-time view of one registered server.
#[derive(Debug, Clone)]
pub struct RegisteredServer {
    pub name: String,
    pub kind: TransportKind,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub last_error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Manages registered servers and the tools they expose.
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    cache: Arc<ToolCache>,
    bus: NotificationBus,
    log: Logger,
}

impl ToolRegistry {
    pub fn new(cache: Arc<ToolCache>, bus: NotificationBus, log: Logger) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            cache,
            bus,
            log,
        }
    }

    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Register a transport under `name` and discover its tools. Returns the
    /// number of tools discovered. On failure nothing stays registered.
    pub async fn register_server(
        &self,
        name: &str,
        transport: Arc<dyn McpTransport>,
    ) -> Result<usize, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName(name.to_string()));
        }

        {
            let mut state = self.state.write().await;
            if state.servers.contains_key(name) {
                return Err(RegistryError::DuplicateServer(name.to_string()));
            }
            state.servers.insert(
                name.to_string(),
                ServerEntry {
                    transport: Arc::clone(&transport),
                    last_error: None,
                    refreshed_at: None,
                },
            );
        }
        tracing::info!(parent: self.log.span(), server = %name, kind = %transport.kind(), "Registering server");

        match self.discover(name, &transport).await {
            Ok(tools) => self
                .apply(name, &transport, tools)
                .await
                .ok_or_else(|| RegistryError::ServerNotFound(name.to_string())),
            Err(source) => {
                let mut state = self.state.write().await;
                if state
                    .servers
                    .get(name)
                    .is_some_and(|entry| same_transport(&entry.transport, &transport))
                {
                    state.servers.remove(name);
                }
                drop(state);
                tracing::warn!(parent: self.log.span(), server = %name, error = %source, "Registration rolled back");
                Err(RegistryError::Discovery {
                    server: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Remove a server, its tools and its cache entries. The transport is
    /// handed back still connected; closing it is the caller's call.
    pub async fn unregister_server(&self, name: &str) -> Result<Arc<dyn McpTransport>, RegistryError> {
        let mut state = self.state.write().await;
        let entry = state
            .servers
            .remove(name)
            .ok_or_else(|| RegistryError::ServerNotFound(name.to_string()))?;
        let before = state.tools.len();
        state.tools.retain(|_, tool| tool.server != name);
        let removed = before - state.tools.len();
        self.cache.remove_server(name);
        drop(state);

        tracing::info!(parent: self.log.span(), server = %name, removed_tools = removed, "Server unregistered");
        self.bus.notify_tool_list_changed(name, ORIGIN_REGISTRY, Some(0));
        Ok(entry.transport)
    }

    /// Re-run discovery for one server.
    pub async fn refresh_server(&self, name: &str) -> Result<usize, RegistryError> {
        let transport = self
            .get_server(name)
            .await
            .ok_or_else(|| RegistryError::ServerNotFound(name.to_string()))?;

        match self.discover(name, &transport).await {
            Ok(tools) => self
                .apply(name, &transport, tools)
                .await
                .ok_or_else(|| RegistryError::ServerNotFound(name.to_string())),
            Err(source) => {
                let mut state = self.state.write().await;
                if let Some(entry) = state.servers.get_mut(name) {
                    if same_transport(&entry.transport, &transport) {
                        entry.last_error = Some(source.to_string());
                    }
                }
                drop(state);
                tracing::warn!(parent: self.log.span(), server = %name, error = %source, "Refresh failed");
                Err(RegistryError::Discovery {
                    server: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Re-discover every server concurrently. One failure does not stop the
    /// others; the error reports all of them. Returns the total tool count.
    pub async fn refresh_tools(&self) -> Result<usize, RegistryError> {
        let names = self.server_names().await;
        self.refresh_many(names).await
    }

    /// Servers with at least one cache entry past its TTL.
    pub async fn stale_servers(&self) -> Vec<String> {
        let expired = self.cache.expired_servers();
        let state = self.state.read().await;
        let mut stale: Vec<String> = state
            .servers
            .keys()
            .filter(|name| expired.contains(*name))
            .cloned()
            .collect();
        stale.sort();
        stale
    }

    /// Re-discover only the stale servers.
    pub async fn refresh_stale(&self) -> Result<usize, RegistryError> {
        let stale = self.stale_servers().await;
        if stale.is_empty() {
            return Ok(0);
        }
        tracing::debug!(parent: self.log.span(), servers = ?stale, "Refreshing stale servers");
        self.refresh_many(stale).await
    }

    async fn refresh_many(&self, names: Vec<String>) -> Result<usize, RegistryError> {
        let total = names.len();
        let outcomes = join_all(names.iter().map(|name| self.refresh_server(name))).await;

        let mut tools = 0;
        let mut details = Vec::new();
        for (name, outcome) in names.iter().zip(outcomes) {
            match outcome {
                Ok(count) => tools += count,
                Err(e) => details.push(format!("{name}: {e}")),
            }
        }

        if details.is_empty() {
            Ok(tools)
        } else {
            Err(RegistryError::RefreshFailed {
                failed: details.len(),
                total,
                details,
            })
        }
    }

    /// Look a tool up, cache first.
    pub async fn get_tool(&self, name: &str) -> Option<Arc<Tool>> {
        if let Some(tool) = self.cache.get(name) {
            return Some(tool);
        }
        self.state.read().await.tools.get(name).cloned()
    }

    pub async fn get_server(&self, name: &str) -> Option<Arc<dyn McpTransport>> {
        self.state
            .read()
            .await
            .servers
            .get(name)
            .map(|entry| Arc::clone(&entry.transport))
    }

    /// All tools, sorted by name.
    pub async fn list_tools(&self) -> Vec<Arc<Tool>> {
        let mut tools: Vec<Arc<Tool>> = self.state.read().await.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub async fn list_tools_for_server(&self, server: &str) -> Vec<Arc<Tool>> {
        let mut tools: Vec<Arc<Tool>> = self
            .state
            .read()
            .await
            .tools
            .values()
            .filter(|tool| tool.server == server)
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().await.servers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn server_infos(&self) -> Vec<RegisteredServer> {
        let state = self.state.read().await;
        let mut infos: Vec<RegisteredServer> = state
            .servers
            .iter()
            .map(|(name, entry)| RegisteredServer {
                name: name.clone(),
                kind: entry.transport.kind(),
                state: entry.transport.state(),
                tool_count: state.tools.values().filter(|t| &t.server == name).count(),
                last_error: entry.last_error.clone(),
                refreshed_at: entry.refreshed_at,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn tool_count(&self) -> usize {
        self.state.read().await.tools.len()
    }

    /// Connect if needed and list the server's tools. No lock held.
    async fn discover(&self, name: &str, transport: &Arc<dyn McpTransport>) -> Result<Vec<Arc<Tool>>, McpError> {
        if !transport.is_connected() {
            transport.connect().await?;
        }
        let infos = transport.list_tools(&CancelSignal::never()).await?;
        let log = self.log.for_server(name);
        Ok(infos
            .into_iter()
            .map(|info| Arc::new(Tool::from_info(info, name, &log)))
            .collect())
    }

    /// Swap in a server's freshly discovered tools. `None` if the server was
    /// unregistered or replaced while discovery ran.
    async fn apply(&self, name: &str, transport: &Arc<dyn McpTransport>, tools: Vec<Arc<Tool>>) -> Option<usize> {
        let mut state = self.state.write().await;
        let current = state
            .servers
            .get(name)
            .is_some_and(|entry| same_transport(&entry.transport, transport));
        if !current {
            tracing::debug!(parent: self.log.span(), server = %name, "Server went away during discovery; dropping results");
            return None;
        }

        state.tools.retain(|_, tool| tool.server != name);
        self.cache.remove_server(name);
        for tool in &tools {
            if let Some(previous) = state.tools.get(&tool.name) {
                tracing::warn!(
                    parent: self.log.span(),
                    tool = %tool.name,
                    previous = %previous.server,
                    server = %name,
                    "Tool name collision; last discovery wins"
                );
            }
            state.tools.insert(tool.name.clone(), Arc::clone(tool));
        }
        self.cache.set_many(tools.iter().cloned());

        if let Some(entry) = state.servers.get_mut(name) {
            entry.last_error = None;
            entry.refreshed_at = Some(Utc::now());
        }
        drop(state);

        let count = tools.len();
        tracing::info!(parent: self.log.span(), server = %name, tools = count, "Tools discovered");
        self.bus.notify_tool_list_changed(name, ORIGIN_REGISTRY, Some(count));
        Some(count)
    }
}

fn same_transport(a: &Arc<dyn McpTransport>, b: &Arc<dyn McpTransport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
