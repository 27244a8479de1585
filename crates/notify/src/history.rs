//! Optional decorators layered on top of raw bus delivery.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::bus::Listener;
use crate::notification::{Notification, NotificationKind};

/// Matches notifications by kind and/or server. An empty filter matches
/// everything.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    kinds: Option<HashSet<NotificationKind>>,
    server: Option<String>,
}

impl NotificationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: NotificationKind) -> Self {
        self.kinds.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        let kind_ok = self
            .kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&notification.kind));
        let server_ok = self
            .server
            .as_deref()
            .map_or(true, |server| server == notification.server);
        kind_ok && server_ok
    }
}

/// Bounded ring buffer of the most recent notifications. Subscribe it to a
/// bus like any other listener.
pub struct NotificationHistory {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<Notification>>>,
}

impl NotificationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn record(&self, notification: Arc<Notification>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(notification);
    }

    /// Up to `limit` matching notifications, newest first.
    pub fn recent(&self, filter: &NotificationFilter, limit: usize) -> Vec<Arc<Notification>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .rev()
            .filter(|n| filter.matches(n))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl Listener for NotificationHistory {
    async fn on_notification(&self, notification: Arc<Notification>) -> anyhow::Result<()> {
        self.record(notification);
        Ok(())
    }

    fn name(&self) -> &str {
        "history"
    }
}

/// Forwards only notifications that match a filter.
pub struct Filtered<L> {
    filter: NotificationFilter,
    inner: L,
}

impl<L: Listener> Filtered<L> {
    pub fn new(filter: NotificationFilter, inner: L) -> Self {
        Self { filter, inner }
    }
}

#[async_trait]
impl<L: Listener> Listener for Filtered<L> {
    async fn on_notification(&self, notification: Arc<Notification>) -> anyhow::Result<()> {
        if self.filter.matches(&notification) {
            self.inner.on_notification(notification).await
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FnListener;
    use crate::notification::ServerStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn history_keeps_newest_within_capacity() {
        let history = NotificationHistory::new(2);
        for server in ["a", "b", "c"] {
            history.record(Arc::new(Notification::server_status(server, ServerStatus::Connected, None)));
        }
        assert_eq!(history.len(), 2);
        let recent = history.recent(&NotificationFilter::new(), 10);
        let servers: Vec<&str> = recent.iter().map(|n| n.server.as_str()).collect();
        assert_eq!(servers, vec!["c", "b"]);
    }

    #[test]
    fn filter_by_kind_and_server() {
        let history = NotificationHistory::new(10);
        history.record(Arc::new(Notification::server_status("a", ServerStatus::Connected, None)));
        history.record(Arc::new(Notification::tool_list_changed("a", "server", None)));
        history.record(Arc::new(Notification::tool_list_changed("b", "server", None)));

        let filter = NotificationFilter::new()
            .kind(NotificationKind::ToolListChanged)
            .server("a");
        let matched = history.recent(&filter, 10);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].server, "a");
        assert_eq!(matched[0].kind, NotificationKind::ToolListChanged);
    }

    #[tokio::test]
    async fn filtered_listener_skips_non_matching() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener = Filtered::new(
            NotificationFilter::new().kind(NotificationKind::Progress),
            FnListener::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        listener
            .on_notification(Arc::new(Notification::progress("a", None)))
            .await
            .unwrap();
        listener
            .on_notification(Arc::new(Notification::server_status("a", ServerStatus::Error, None)))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
