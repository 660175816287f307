//! Activity event stream
//!
//! Everything observable the core does - tool calls, terminal output, file
//! changes, expiries - is published here as an [`ActivityEvent`], keyed by
//! session. The broadcaster is transport-agnostic: the presentation layer
//! subscribes however it likes, and publishing with zero subscribers is a
//! no-op, not an error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;

/// Default per-session channel capacity (events, not bytes)
const DEFAULT_CAPACITY: usize = 256;

/// What happened, with kind-specific payload
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    /// The agent is about to dispatch a tool
    ToolCall { tool: String, summary: String },
    /// Command output (or other terminal-ish informational text)
    Terminal { output: String },
    /// A file inside the environment was written
    FileChange { path: String },
    /// A preview server is reachable at this URL
    PreviewReady { url: String },
    /// Something went wrong; the loop may still continue
    Error { message: String },
    /// A previously active environment was discovered dead
    EnvironmentExpired { environment_id: String },
}

/// Immutable, timestamped notice of progress for one session
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub session_key: String,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl ActivityEvent {
    pub fn now(session_key: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            session_key: session_key.into(),
            timestamp_ms: unix_millis(),
            kind,
        }
    }
}

/// Milliseconds since the Unix epoch
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fan-out publisher keyed by session.
///
/// One broadcast channel per session key, created lazily. Delivery order
/// for a single publisher equals emission order; slow subscribers that
/// overrun the channel capacity lose the oldest events (tokio broadcast
/// semantics), which is acceptable for a progress stream.
pub struct ActivityBroadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<ActivityEvent>>>,
    capacity: usize,
}

impl ActivityBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Publish an event to whoever is listening on its session.
    ///
    /// Never fails: no channel or no subscribers both mean the event is
    /// simply dropped.
    pub fn publish(&self, event: ActivityEvent) {
        let sender = {
            let channels = self.channels.lock().expect("broadcaster lock poisoned");
            channels.get(&event.session_key).cloned()
        };
        if let Some(sender) = sender {
            // Err here just means zero receivers right now
            let _ = sender.send(event);
        }
    }

    /// Subscribe to a session's event stream
    pub fn subscribe(&self, session_key: &str) -> broadcast::Receiver<ActivityEvent> {
        let mut channels = self.channels.lock().expect("broadcaster lock poisoned");
        channels
            .entry(session_key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for ActivityBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
