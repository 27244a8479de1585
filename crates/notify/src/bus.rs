//! Publish/subscribe registry for lifecycle notifications.
//!
//! `notify` snapshots the listener list under a read lock and hands each
//! listener the event on its own task. A listener that fails, panics or
//! stalls only affects itself; the publisher never waits on delivery.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use uuid::Uuid;

use toolwire_core::Logger;

use crate::notification::{Notification, ServerStatus};

/// Receives notifications published on a [`NotificationBus`].
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_notification(&self, notification: Arc<Notification>) -> anyhow::Result<()>;

    /// Name used in delivery failure logs.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Adapts a plain closure into a [`Listener`].
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    async fn on_notification(&self, notification: Arc<Notification>) -> anyhow::Result<()> {
        (self.f)(&notification);
        Ok(())
    }
}

struct BusInner {
    listeners: RwLock<Vec<(Uuid, Arc<dyn Listener>)>>,
    log: Logger,
}

/// Cheaply cloneable handle; clones share one listener registry.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new(log: Logger) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                log,
            }),
        }
    }

    /// Register a listener. The returned handle removes exactly this
    /// listener; dropping the handle leaves it subscribed.
    pub fn subscribe(&self, listener: Arc<dyn Listener>) -> Subscription {
        let id = Uuid::new_v4();
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        tracing::debug!(parent: self.inner.log.span(), subscription = %id, "Listener subscribed");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener::new(f)))
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Publish to every current listener without waiting for delivery.
    pub fn notify(&self, notification: Notification) {
        let snapshot: Vec<Arc<dyn Listener>> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        tracing::debug!(
            parent: self.inner.log.span(),
            kind = %notification.kind,
            server = %notification.server,
            listeners = snapshot.len(),
            "Publishing notification"
        );

        if snapshot.is_empty() {
            return;
        }

        let shared = Arc::new(notification);
        for listener in snapshot {
            self.deliver(listener, Arc::clone(&shared));
        }
    }

    pub fn notify_server_status(&self, server: &str, status: ServerStatus, error: Option<&str>) {
        self.notify(Notification::server_status(server, status, error));
    }

    pub fn notify_resource_change(&self, server: &str, params: Option<Value>) {
        self.notify(Notification::resource_update(server, params));
    }

    pub fn notify_tool_list_changed(&self, server: &str, origin: &str, tool_count: Option<usize>) {
        self.notify(Notification::tool_list_changed(server, origin, tool_count));
    }

    pub fn notify_progress(&self, server: &str, params: Option<Value>) {
        self.notify(Notification::progress(server, params));
    }

    fn deliver(&self, listener: Arc<dyn Listener>, notification: Arc<Notification>) {
        let log = self.inner.log.clone();
        let delivery = async move {
            let kind = notification.kind;
            let outcome = AssertUnwindSafe(listener.on_notification(notification))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    parent: log.span(),
                    listener = listener.name(),
                    kind = %kind,
                    error = %e,
                    "Notification listener failed"
                ),
                Err(_) => tracing::error!(
                    parent: log.span(),
                    listener = listener.name(),
                    kind = %kind,
                    "Notification listener panicked"
                ),
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delivery);
            }
            // No runtime to hand off to; deliver on a short-lived thread.
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("toolwire-notify".to_string())
                    .spawn(move || futures::executor::block_on(delivery));
                if let Err(e) = spawned {
                    tracing::error!(
                        parent: self.inner.log.span(),
                        error = %e,
                        "Failed to start notification delivery thread"
                    );
                }
            }
        }
    }
}

/// Handle returned by [`NotificationBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the listener. Returns false if it was already gone or the bus
    /// no longer exists.
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut listeners = bus.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        let removed = listeners.len() != before;
        drop(listeners);
        if removed {
            tracing::debug!(parent: bus.log.span(), subscription = %self.id, "Listener unsubscribed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::notification::NotificationKind;

    const WAIT: Duration = Duration::from_secs(2);

    fn bus() -> NotificationBus {
        NotificationBus::new(Logger::disabled())
    }

    fn channel_listener(bus: &NotificationBus) -> (Subscription, mpsc::UnboundedReceiver<Arc<Notification>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        struct Forward(mpsc::UnboundedSender<Arc<Notification>>);

        #[async_trait]
        impl Listener for Forward {
            async fn on_notification(&self, n: Arc<Notification>) -> anyhow::Result<()> {
                self.0.send(n)?;
                Ok(())
            }
        }

        (bus.subscribe(Arc::new(Forward(tx))), rx)
    }

    struct Failing;

    #[async_trait]
    impl Listener for Failing {
        async fn on_notification(&self, _n: Arc<Notification>) -> anyhow::Result<()> {
            anyhow::bail!("listener is broken")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct Panicking;

    #[async_trait]
    impl Listener for Panicking {
        async fn on_notification(&self, _n: Arc<Notification>) -> anyhow::Result<()> {
            panic!("listener exploded");
        }
    }

    struct Stalling;

    #[async_trait]
    impl Listener for Stalling {
        async fn on_notification(&self, _n: Arc<Notification>) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let bus = bus();
        let (_a, mut rx_a) = channel_listener(&bus);
        let (_b, mut rx_b) = channel_listener(&bus);

        bus.notify_server_status("fs", ServerStatus::Connected, None);

        let got_a = timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        let got_b = timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(got_a.kind, NotificationKind::ServerStatus);
        // Both listeners see the very same allocation.
        assert!(Arc::ptr_eq(&got_a, &got_b));
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_listener() {
        let bus = bus();
        let (sub_a, mut rx_a) = channel_listener(&bus);
        let (_sub_b, mut rx_b) = channel_listener(&bus);
        assert_eq!(bus.listener_count(), 2);

        assert!(sub_a.unsubscribe());
        assert_eq!(bus.listener_count(), 1);

        bus.notify_tool_list_changed("fs", "registry", Some(3));
        let got_b = timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(got_b.kind, NotificationKind::ToolListChanged);

        // The sender side of a's channel was dropped with the listener.
        assert!(timeout(WAIT, rx_a.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_and_panicking_listeners_are_isolated() {
        let bus = bus();
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(Arc::new(Panicking));
        let (_ok, mut rx) = channel_listener(&bus);

        bus.notify_progress("fs", Some(serde_json::json!({"progress": 1})));
        bus.notify_progress("fs", Some(serde_json::json!({"progress": 2})));

        let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let mut seen = vec![first.data["progress"].clone(), second.data["progress"].clone()];
        seen.sort_by_key(|v| v.as_i64());
        assert_eq!(seen, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[tokio::test]
    async fn stalled_listener_does_not_block_publisher() {
        let bus = bus();
        bus.subscribe(Arc::new(Stalling));
        let (_ok, mut rx) = channel_listener(&bus);

        let started = std::time::Instant::now();
        for _ in 0..10 {
            bus.notify_resource_change("fs", Some(serde_json::json!({"uri": "file:///a"})));
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        for _ in 0..10 {
            timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        }
    }

    #[test]
    fn publishes_without_runtime_without_waiting() {
        let bus = bus();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let gate = std::sync::Mutex::new(release_rx);
        bus.subscribe_fn(move |_| {
            let released = gate.lock().unwrap().recv_timeout(WAIT).is_ok();
            if released {
                done_tx.send(()).unwrap();
            }
        });

        // Returns while the listener is still blocked on the gate.
        bus.notify_server_status("fs", ServerStatus::Disconnected, None);
        release_tx.send(()).unwrap();
        done_rx.recv_timeout(WAIT).unwrap();
    }

    #[test]
    fn unsubscribe_after_bus_dropped() {
        let bus = bus();
        let sub = bus.subscribe_fn(|_| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }
}
