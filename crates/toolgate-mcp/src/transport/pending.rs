use crate::protocol::JsonRpcResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use toolgate_core::{ToolgateError, ToolgateResult};

/// Requests awaiting a response on a transport with a persistent inbound stream.
///
/// Once closed, every waiter is woken with an error and no new request can
/// be registered.
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        })
    }

    /// Allocates an id and a slot for its response.
    pub(crate) fn register(self: &Arc<Self>) -> ToolgateResult<PendingRequest> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut waiters = self.waiters.lock();
            // Checked under the lock so a concurrent close cannot miss the new waiter.
            if self.is_closed() {
                return Err(ToolgateError::Transport(self.close_reason()));
            }
            waiters.insert(id, tx);
        }
        Ok(PendingRequest {
            id,
            rx: Some(rx),
            pending: Arc::clone(self),
        })
    }

    /// Routes a response to its waiter. Returns false for an unknown id.
    pub(crate) fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.numeric_id() else {
            return false;
        };
        match self.waiters.lock().remove(&id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Fails all outstanding requests and refuses new ones.
    pub(crate) fn close(&self, reason: impl Into<String>) {
        let mut waiters = self.waiters.lock();
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.close_reason.lock() = Some(reason.into());
        }
        waiters.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close_reason(&self) -> String {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "transport closed".to_string())
    }
}

/// A registered request. Dropping it before the response arrives frees the slot.
pub(crate) struct PendingRequest {
    id: u64,
    rx: Option<oneshot::Receiver<JsonRpcResponse>>,
    pending: Arc<PendingRequests>,
}

impl PendingRequest {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) async fn wait(mut self) -> ToolgateResult<JsonRpcResponse> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| ToolgateError::Transport("response already consumed".into()))?;
        rx.await
            .map_err(|_| ToolgateError::Transport(self.pending.close_reason()))
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.pending.waiters.lock().remove(&self.id);
    }
}
