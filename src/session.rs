use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::McpResponse;

pub const UNKNOWN_CLIENT: &str = "Unknown/Unknown";

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub client: String,
    pub started_at: Instant,
}

impl Session {
    pub fn new(client: Option<String>) -> Self {
        Self {
            id: new_session_id(),
            client: client.unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
            started_at: Instant::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

static CLOCK_ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

/// `session_{monotonic millis}_{random hex}`. The clock counts from the first
/// id issued in this process, so it never runs backwards.
pub fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", CLOCK_ORIGIN.elapsed().as_millis(), &suffix[..8])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub client: String,
    /// Milliseconds since the stream opened.
    pub duration: u64,
}

/// Responses for `/messages` posts are pushed into the owning stream.
pub type Outbox = mpsc::UnboundedSender<McpResponse>;

struct Entry {
    session: Session,
    outbox: Option<Outbox>,
}

/// Shared map of open event-stream sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // a panic while holding the lock leaves the map itself consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, session: Session, outbox: Option<Outbox>) -> usize {
        let mut map = self.lock();
        map.insert(session.id.clone(), Entry { session, outbox });
        map.len()
    }

    /// Idempotent; returns the removed session when it was present.
    pub fn unregister(&self, id: &str) -> Option<Session> {
        self.lock().remove(id).map(|e| e.session)
    }

    pub fn outbox(&self, id: &str) -> Option<Outbox> {
        self.lock().get(id).and_then(|e| e.outbox.clone())
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.lock()
            .values()
            .map(|e| SessionSummary {
                id: e.session.id.clone(),
                client: e.session.client.clone(),
                duration: e.session.duration().as_millis() as u64,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Drops every entry and its outbox. Streams still running end their own
    /// unregister as a no-op.
    pub fn clear(&self) -> usize {
        let mut map = self.lock();
        let n = map.len();
        map.clear();
        n
    }
}
