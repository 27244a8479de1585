//! Request/response correlation.
//!
//! Each outbound request registers a single-use slot under a fresh id
//! *before* its bytes are written. The reader routes responses into slots by
//! id. A [`PendingSlot`] removes its entry when dropped, so a slot never
//! outlives the wait that owns it, whether the wait succeeds, times out, is
//! cancelled, or the future is simply dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::cancel::CancelSignal;
use crate::error::McpError;
use crate::types::{JsonRpcMessage, RpcId};

/// Correlation table for one transport.
#[derive(Debug)]
pub struct PendingRequests {
    next_id: AtomicI64,
    slots: Mutex<HashMap<RpcId, oneshot::Sender<JsonRpcMessage>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next id and register a slot for it.
    pub fn register(self: &Arc<Self>) -> PendingSlot {
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);
        PendingSlot {
            id,
            rx: Some(rx),
            pending: Arc::clone(self),
        }
    }

    /// Hand a response to its waiter. Returns false when no slot matches,
    /// e.g. the waiter already timed out.
    pub fn complete(&self, message: JsonRpcMessage) -> bool {
        let Some(id) = message.id.clone() else {
            return false;
        };
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match slot {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Drop every slot. Waiters observe [`McpError::ConnectionClosed`].
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let n = slots.len();
        slots.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &RpcId) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// A registered slot awaiting its response.
#[derive(Debug)]
pub struct PendingSlot {
    id: RpcId,
    rx: Option<oneshot::Receiver<JsonRpcMessage>>,
    pending: Arc<PendingRequests>,
}

impl PendingSlot {
    pub fn id(&self) -> &RpcId {
        &self.id
    }

    /// Wait for the response, the timeout, or cancellation, whichever
    /// comes first.
    pub async fn wait(
        mut self,
        method: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<JsonRpcMessage, McpError> {
        let Some(rx) = self.rx.take() else {
            return Err(McpError::ConnectionClosed);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpError::Cancelled {
                method: method.to_string(),
            }),
            received = tokio::time::timeout(timeout, rx) => match received {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(_)) => Err(McpError::ConnectionClosed),
                Err(_) => Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                }),
            },
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}
