//! Facade wiring transports, registry, executor and notifications together.
//!
//! The hub is what an embedding application talks to: it turns server
//! configurations into registered transports, remembers servers that failed
//! to start, re-discovers a server's tools when the server announces a
//! change, and tears everything down on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use toolwire_core::{ConfigError, Logger, RuntimeConfig, ServerConfig, TransportKind};
use toolwire_mcp::{build_transport, CancelSignal, ConnectionState, McpError, McpTransport};
use toolwire_notify::{
    Listener, Notification, NotificationBus, NotificationHistory, NotificationKind, ServerStatus,
    Subscription, ORIGIN_SERVER,
};

use crate::cache::ToolCache;
use crate::executor::{ExecuteError, ExecuteResult, ToolExecutor};
use crate::registry::{RegistryError, ToolRegistry};
use crate::tool::Tool;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(McpError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<McpError> for HubError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Config(e) => HubError::Config(e),
            other => HubError::Transport(other),
        }
    }
}

/// Status of one configured server, registered or failed.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub status: ServerStatus,
    pub connected: bool,
    pub tool_count: usize,
    pub transport: TransportKind,
    pub error: Option<String>,
}

struct FailedServer {
    transport: TransportKind,
    error: String,
}

pub struct ToolHub {
    runtime: RuntimeConfig,
    bus: NotificationBus,
    history: Arc<NotificationHistory>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    failed: Mutex<HashMap<String, FailedServer>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    log: Logger,
}

impl ToolHub {
    pub fn new(runtime: RuntimeConfig, log: Logger) -> Self {
        let bus = NotificationBus::new(log.clone());
        let cache = Arc::new(ToolCache::new(runtime.cache_ttl, log.clone()));
        let registry = Arc::new(ToolRegistry::new(cache, bus.clone(), log.clone()));
        let executor = ToolExecutor::new(Arc::clone(&registry), log.clone());

        let history = Arc::new(NotificationHistory::new(runtime.history_capacity));
        bus.subscribe(Arc::clone(&history) as Arc<dyn Listener>);
        bus.subscribe(Arc::new(AutoRefresh {
            registry: Arc::downgrade(&registry),
            pending: Mutex::new(HashMap::new()),
            log: log.clone(),
        }));

        Self {
            runtime,
            bus,
            history,
            registry,
            executor,
            failed: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn history(&self) -> &Arc<NotificationHistory> {
        &self.history
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Build the configured transport, connect it and discover its tools.
    /// A failure is remembered and shown by [`list_servers`](Self::list_servers).
    pub async fn register_server(&self, config: ServerConfig) -> Result<(), HubError> {
        let name = config.name.clone();
        let kind = config.transport;
        let transport = match build_transport(config, &self.runtime, self.bus.clone(), self.log.clone()) {
            Ok(transport) => transport,
            Err(e) => {
                let e = HubError::from(e);
                self.record_failure(&name, kind, &e);
                return Err(e);
            }
        };
        self.register_transport(transport).await
    }

    /// Register an already built transport under its own server name.
    pub async fn register_transport(&self, transport: Arc<dyn McpTransport>) -> Result<(), HubError> {
        let name = transport.server_name().to_string();
        match self.registry.register_server(&name, Arc::clone(&transport)).await {
            Ok(count) => {
                self.failures().remove(&name);
                tracing::info!(parent: self.log.span(), server = %name, tools = count, "Server ready");
                Ok(())
            }
            // The already registered server is unaffected.
            Err(e @ RegistryError::DuplicateServer(_)) => Err(e.into()),
            Err(e) => {
                transport.disconnect().await;
                let e = HubError::from(e);
                self.record_failure(&name, transport.kind(), &e);
                Err(e)
            }
        }
    }

    /// Register every server concurrently. Failures do not stop the others;
    /// they are returned with the server name.
    pub async fn register_all<I>(&self, configs: I) -> Vec<(String, HubError)>
    where
        I: IntoIterator<Item = ServerConfig>,
    {
        let attempts = configs.into_iter().map(|config| async move {
            let name = config.name.clone();
            self.register_server(config).await.err().map(|e| (name, e))
        });
        let failures: Vec<(String, HubError)> = join_all(attempts).await.into_iter().flatten().collect();

        if !failures.is_empty() {
            tracing::warn!(
                parent: self.log.span(),
                failed = failures.len(),
                "Some servers failed to start"
            );
        }
        failures
    }

    /// Remove a server and disconnect its transport. Forgets a failed server
    /// of that name as well.
    pub async fn unregister_server(&self, name: &str) -> Result<(), HubError> {
        let forgotten = self.failures().remove(name).is_some();
        match self.registry.unregister_server(name).await {
            Ok(transport) => {
                transport.disconnect().await;
                Ok(())
            }
            Err(RegistryError::ServerNotFound(_)) if forgotten => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Registered and failed servers, sorted by name.
    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let mut servers: Vec<ServerInfo> = self
            .registry
            .server_infos()
            .await
            .into_iter()
            .map(|server| {
                let connected = server.state == ConnectionState::Connected;
                ServerInfo {
                    status: if connected {
                        ServerStatus::Connected
                    } else {
                        ServerStatus::Disconnected
                    },
                    connected,
                    tool_count: server.tool_count,
                    transport: server.kind,
                    error: server.last_error,
                    name: server.name,
                }
            })
            .collect();

        servers.extend(self.failures().iter().map(|(name, failed)| ServerInfo {
            name: name.clone(),
            status: ServerStatus::Error,
            connected: false,
            tool_count: 0,
            transport: failed.transport,
            error: Some(failed.error.clone()),
        }));
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn list_tools(&self) -> Vec<Arc<Tool>> {
        self.registry.list_tools().await
    }

    pub async fn list_tools_for_server(&self, server: &str) -> Vec<Arc<Tool>> {
        self.registry.list_tools_for_server(server).await
    }

    pub async fn execute(
        &self,
        tool: &str,
        args: Value,
        cancel: &CancelSignal,
    ) -> Result<ExecuteResult, ExecuteError> {
        self.executor.execute(tool, args, cancel).await
    }

    pub fn subscribe(&self, listener: Arc<dyn Listener>) -> Subscription {
        self.bus.subscribe(listener)
    }

    pub async fn refresh_tools(&self) -> Result<usize, HubError> {
        Ok(self.registry.refresh_tools().await?)
    }

    /// Re-discover servers whose cached tools expired, every `interval`.
    /// The task stops on [`shutdown`](Self::shutdown) or when the hub is dropped.
    pub fn spawn_refresh_task(&self, interval: Duration) {
        let registry = Arc::downgrade(&self.registry);
        let log = self.log.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                match registry.refresh_stale().await {
                    Ok(0) => {}
                    Ok(count) => tracing::debug!(parent: log.span(), tools = count, "Refreshed stale servers"),
                    Err(e) => tracing::warn!(parent: log.span(), error = %e, "Stale refresh failed"),
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Stop background tasks, unregister every server and disconnect it.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        let names = self.registry.server_names().await;
        let transports = join_all(names.iter().map(|name| self.registry.unregister_server(name))).await;
        join_all(transports.into_iter().flatten().map(|transport| async move {
            transport.disconnect().await;
        }))
        .await;

        self.failures().clear();
        tracing::info!(parent: self.log.span(), servers = names.len(), "Hub shut down");
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, FailedServer>> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_failure(&self, name: &str, transport: TransportKind, error: &HubError) {
        tracing::warn!(parent: self.log.span(), server = %name, error = %error, "Server failed to start");
        self.failures().insert(
            name.to_string(),
            FailedServer {
                transport,
                error: error.to_string(),
            },
        );
    }
}

/// Re-discovers a server's tools when the server reports its list changed.
/// At most one refresh per server runs at a time. A change announced while
/// one is running marks the server dirty, and the running refresh repeats
/// once it finishes so the later list is always fetched.
struct AutoRefresh {
    registry: Weak<ToolRegistry>,
    /// Servers being refreshed, mapped to whether another change arrived.
    pending: Mutex<HashMap<String, bool>>,
    log: Logger,
}

impl AutoRefresh {
    /// Take ownership of refreshing `server`, or mark it dirty for the
    /// current owner.
    fn claim(&self, server: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(server) {
            Some(dirty) => {
                *dirty = true;
                false
            }
            None => {
                pending.insert(server.to_string(), false);
                true
            }
        }
    }

    /// End one refresh pass. True when the server went dirty meanwhile and
    /// needs another pass.
    fn finish_pass(&self, server: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(server) {
            Some(dirty) if *dirty => {
                *dirty = false;
                true
            }
            _ => {
                pending.remove(server);
                false
            }
        }
    }
}

#[async_trait]
impl Listener for AutoRefresh {
    async fn on_notification(&self, notification: Arc<Notification>) -> anyhow::Result<()> {
        if notification.kind != NotificationKind::ToolListChanged
            || notification.origin() != Some(ORIGIN_SERVER)
        {
            return Ok(());
        }
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let server = notification.server.as_str();
        if !self.claim(server) {
            return Ok(());
        }

        loop {
            tracing::debug!(parent: self.log.span(), server = %server, "Server tool list changed, re-discovering");
            let refreshed = registry.refresh_server(server).await;
            if !self.finish_pass(server) {
                refreshed?;
                return Ok(());
            }
            if let Err(e) = refreshed {
                tracing::warn!(parent: self.log.span(), server = %server, error = %e, "Re-discovery failed, retrying for newer change");
            }
        }
    }

    fn name(&self) -> &str {
        "auto-refresh"
    }
}
