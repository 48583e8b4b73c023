//! Event sources and the in-process listener hub.
//!
//! A source is any component producing named events. The broker consumes
//! sources through the [`EventSource`] seam; [`EventHub`] is the provided
//! implementation that in-process producers (log capture, settings, game
//! connection) embed and `emit` into.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use relayhub_core::prelude::*;
use serde::{Deserialize, Serialize};

/// Identifies one listener on one named event of one source.
///
/// The broker allocates these; a source only needs them for membership
/// checks and removal.
pub type ListenerId = u64;

/// Callback invoked with the payload of each raised event
pub type EventCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Source Keys
// ─────────────────────────────────────────────────────────────────

/// Stable key of an event source.
///
/// The known kinds are a closed set checked at compile time; `Custom`
/// preserves runtime pluggability for sources registered by extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceKey {
    Logs,
    App,
    Windows,
    GameConnection,
    Telemetry,
    Custom(String),
}

impl SourceKey {
    pub fn as_str(&self) -> &str {
        match self {
            SourceKey::Logs => "logs",
            SourceKey::App => "app",
            SourceKey::Windows => "windows",
            SourceKey::GameConnection => "gameConnection",
            SourceKey::Telemetry => "telemetry",
            SourceKey::Custom(key) => key,
        }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SourceKey {
    fn from(key: &str) -> Self {
        match key {
            "logs" => SourceKey::Logs,
            "app" => SourceKey::App,
            "windows" => SourceKey::Windows,
            "gameConnection" => SourceKey::GameConnection,
            "telemetry" => SourceKey::Telemetry,
            other => SourceKey::Custom(other.to_string()),
        }
    }
}

impl From<String> for SourceKey {
    fn from(key: String) -> Self {
        SourceKey::from(key.as_str())
    }
}

impl From<SourceKey> for String {
    fn from(key: SourceKey) -> Self {
        key.as_str().to_string()
    }
}

// ─────────────────────────────────────────────────────────────────
// EventSource Seam
// ─────────────────────────────────────────────────────────────────

/// Attach/detach capability of any event source.
///
/// Both operations must be idempotent per (event, id): adding a listener id
/// that is already attached, or removing one that is not, is a no-op.
pub trait EventSource: Send + Sync {
    fn add_listener(&self, event: &str, id: ListenerId, callback: EventCallback);
    fn remove_listener(&self, event: &str, id: ListenerId);
}

// ─────────────────────────────────────────────────────────────────
// EventHub
// ─────────────────────────────────────────────────────────────────

/// Listener table for in-process event producers.
///
/// `emit` is non-blocking for the producer; listener errors are the
/// listeners' problem. Emitting with no listeners attached is free.
#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventCallback)>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every listener attached to `event`.
    ///
    /// The listener list is snapshotted before invocation so callbacks may
    /// attach/detach (including themselves) without deadlocking.
    pub fn emit(&self, event: &str, payload: &serde_json::Value) {
        let snapshot: Vec<EventCallback> = {
            let listeners = self.listeners.lock().expect("listener table poisoned");
            match listeners.get(event) {
                Some(entries) => entries.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for callback in snapshot {
            callback(payload);
        }
    }

    /// Number of listeners currently attached to `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .expect("listener table poisoned")
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl EventSource for EventHub {
    fn add_listener(&self, event: &str, id: ListenerId, callback: EventCallback) {
        let mut listeners = self.listeners.lock().expect("listener table poisoned");
        let entries = listeners.entry(event.to_string()).or_default();
        if entries.iter().any(|(existing, _)| *existing == id) {
            debug!("Listener {id} already attached to {event}");
            return;
        }
        entries.push((id, callback));
    }

    fn remove_listener(&self, event: &str, id: ListenerId) {
        let mut listeners = self.listeners.lock().expect("listener table poisoned");
        if let Some(entries) = listeners.get_mut(event) {
            entries.retain(|(existing, _)| *existing != id);
            if entries.is_empty() {
                listeners.remove(event);
            }
        }
    }
}
