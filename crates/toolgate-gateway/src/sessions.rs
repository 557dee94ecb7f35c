use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffered replies per event-stream client.
const STREAM_BUFFER: usize = 64;

/// Streamable HTTP sessions unused for this long are forgotten.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(60 * 60);

/// Most streamable HTTP sessions kept at once; the least recently used one
/// is evicted to make room.
pub const DEFAULT_MAX_HTTP_SESSIONS: usize = 10_000;

/// Tracks the sessions of MCP clients connected to the gateway.
///
/// Streamable HTTP sessions are ids with a last-used time and expire when
/// idle. Event-stream sessions hold the sender feeding the client's open
/// stream and live as long as that stream.
pub struct SessionRegistry {
    http: RwLock<HashMap<Uuid, Instant>>,
    streams: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
    idle_timeout: Duration,
    max_http: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            http: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            idle_timeout: DEFAULT_SESSION_IDLE,
            max_http: DEFAULT_MAX_HTTP_SESSIONS,
        }
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an empty registry with custom HTTP session limits.
    pub fn with_limits(idle_timeout: Duration, max_http: usize) -> Arc<Self> {
        Arc::new(Self {
            idle_timeout,
            max_http: max_http.max(1),
            ..Self::default()
        })
    }

    /// Issues a new streamable HTTP session id. Expired sessions are pruned
    /// and, at capacity, the least recently used session is evicted.
    pub fn open_http(&self) -> Uuid {
        let id = Uuid::new_v4();
        let now = Instant::now();
        let mut http = self.http.write();
        let before = http.len();
        http.retain(|_, last_used| now.duration_since(*last_used) < self.idle_timeout);
        if http.len() < before {
            debug!(expired = before - http.len(), "Pruned idle MCP HTTP sessions");
        }
        if http.len() >= self.max_http {
            let oldest = http
                .iter()
                .min_by_key(|(_, last_used)| **last_used)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                http.remove(&oldest);
                warn!(session_id = %oldest, "MCP HTTP session limit reached, evicted oldest");
            }
        }
        http.insert(id, now);
        info!(session_id = %id, "MCP HTTP session opened");
        id
    }

    /// Whether `id` is a live streamable HTTP session. A live session's
    /// idle timer restarts.
    pub fn has_http(&self, id: Uuid) -> bool {
        let now = Instant::now();
        let mut http = self.http.write();
        match http.get_mut(&id) {
            Some(last_used) if now.duration_since(*last_used) < self.idle_timeout => {
                *last_used = now;
                true
            }
            Some(_) => {
                http.remove(&id);
                debug!(session_id = %id, "MCP HTTP session expired");
                false
            }
            None => false,
        }
    }

    /// Ends a streamable HTTP session. Returns false for an unknown id.
    pub fn close_http(&self, id: Uuid) -> bool {
        let removed = self.http.write().remove(&id).is_some();
        if removed {
            info!(session_id = %id, "MCP HTTP session closed");
        }
        removed
    }

    /// Registers a new event stream and returns its id and message receiver.
    pub fn open_stream(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.streams.write().insert(id, tx);
        info!(session_id = %id, "MCP event stream opened");
        (id, rx)
    }

    /// Sender feeding the event stream `id`, if it is still open.
    pub fn stream(&self, id: Uuid) -> Option<mpsc::Sender<String>> {
        self.streams.read().get(&id).cloned()
    }

    /// Forgets the event stream `id`.
    pub fn close_stream(&self, id: Uuid) {
        if self.streams.write().remove(&id).is_some() {
            info!(session_id = %id, "MCP event stream closed");
        }
    }

    /// Number of live sessions of both kinds.
    pub fn session_count(&self) -> usize {
        self.http.read().len() + self.streams.read().len()
    }
}

/// Removes an event-stream session when the client's stream is dropped.
pub(crate) struct StreamGuard {
    pub(crate) id: Uuid,
    pub(crate) sessions: Arc<SessionRegistry>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.sessions.close_stream(self.id);
    }
}
