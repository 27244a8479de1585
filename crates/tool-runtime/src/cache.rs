//! TTL store of tool descriptors keyed by tool name.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use toolwire_core::Logger;

use crate::tool::Tool;

struct CacheEntry {
    tool: Arc<Tool>,
    written_at: Instant,
}

/// Every write is stamped with the current instant and lives for one TTL.
/// Expired entries read as absent but stay stored, so staleness stays
/// visible to [`expired_servers`](Self::expired_servers) until a purge.
pub struct ToolCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    log: Logger,
}

impl ToolCache {
    pub fn new(ttl: Duration, log: Logger) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            log,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .filter(|entry| entry.written_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.tool))
    }

    pub fn set(&self, tool: Arc<Tool>) {
        self.set_many([tool]);
    }

    /// Write a batch under one lock acquisition, all with the same stamp.
    pub fn set_many<I>(&self, tools: I)
    where
        I: IntoIterator<Item = Arc<Tool>>,
    {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for tool in tools {
            entries.insert(
                tool.name.clone(),
                CacheEntry {
                    tool,
                    written_at: now,
                },
            );
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Drop every entry owned by `server`.
    pub fn remove_server(&self, server: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.tool.server != server);
        before - entries.len()
    }

    /// Servers owning at least one expired entry.
    pub fn expired_servers(&self) -> HashSet<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.written_at.elapsed() >= self.ttl)
            .map(|entry| entry.tool.server.clone())
            .collect()
    }

    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.written_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge expired entries every `interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(parent: cache.log.span(), purged, "Swept expired tool entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    fn tool(name: &str, server: &str) -> Arc<Tool> {
        Arc::new(Tool {
            name: name.to_string(),
            description: String::new(),
            input_schema: Value::Null,
            schema: Ok(None),
            server: server.to_string(),
            updated_at: Utc::now(),
        })
    }

    fn cache(ttl: Duration) -> ToolCache {
        ToolCache::new(ttl, Logger::disabled())
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = cache(Duration::from_millis(50));
        cache.set(tool("echo", "a"));
        assert!(cache.get("echo").is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("echo").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn rewrite_restamps_entry() {
        let cache = cache(Duration::from_secs(60));
        cache.set(tool("echo", "a"));
        cache.set(tool("echo", "b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("echo").unwrap().server, "b");
    }

    #[test]
    fn remove_server_only_touches_its_entries() {
        let cache = cache(Duration::from_secs(60));
        cache.set_many([tool("read", "fs"), tool("write", "fs"), tool("search", "web")]);
        assert_eq!(cache.remove_server("fs"), 2);
        assert!(cache.get("read").is_none());
        assert!(cache.get("search").is_some());
        assert!(!cache.remove("read"));
        assert!(cache.remove("search"));
    }

    #[tokio::test]
    async fn expired_servers_and_purge() {
        let cache = cache(Duration::from_millis(30));
        cache.set_many([tool("read", "fs"), tool("search", "web")]);
        assert!(cache.expired_servers().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.set(tool("search", "web"));
        let expired = cache.expired_servers();
        assert_eq!(expired.len(), 1);
        assert!(expired.contains("fs"));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn sweeper_purges_in_background() {
        let cache = Arc::new(cache(Duration::from_millis(20)));
        cache.set(tool("echo", "a"));
        let sweeper = cache.spawn_sweeper(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
