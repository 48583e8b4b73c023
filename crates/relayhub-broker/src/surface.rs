//! The surface seam: a UI endpoint with visibility signals and a send
//! capability.
//!
//! Surfaces are created and destroyed by an external window manager; the
//! broker never creates or destroys one, only observes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use relayhub_core::Result;

/// Surface identity, assigned by the window manager
pub type SurfaceId = String;

/// Handle for one installed signal binding, used for removal
pub type BindingId = u64;

/// Callback bound to a surface lifecycle signal
pub type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle signals a surface can emit.
///
/// Some platforms emit show/hide AND restore/minimize for the same user
/// action, others only one of the pairs, so both are bound everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceSignal {
    Shown,
    Hidden,
    Minimized,
    Restored,
    Responsive,
    Unresponsive,
    Destroyed,
    StartedReload,
}

impl SurfaceSignal {
    /// Signals that resume a non-persistent subscription
    pub const RESUME: [SurfaceSignal; 3] = [
        SurfaceSignal::Responsive,
        SurfaceSignal::Shown,
        SurfaceSignal::Restored,
    ];

    /// Signals that suspend a non-persistent subscription
    pub const SUSPEND: [SurfaceSignal; 3] = [
        SurfaceSignal::Unresponsive,
        SurfaceSignal::Hidden,
        SurfaceSignal::Minimized,
    ];

    /// Signals that tear a subscription down, terminally
    pub const SHUTDOWN: [SurfaceSignal; 2] =
        [SurfaceSignal::Destroyed, SurfaceSignal::StartedReload];

    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceSignal::Shown => "shown",
            SurfaceSignal::Hidden => "hidden",
            SurfaceSignal::Minimized => "minimized",
            SurfaceSignal::Restored => "restored",
            SurfaceSignal::Responsive => "responsive",
            SurfaceSignal::Unresponsive => "unresponsive",
            SurfaceSignal::Destroyed => "destroyed",
            SurfaceSignal::StartedReload => "started-reload",
        }
    }
}

impl std::fmt::Display for SurfaceSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serialized message bound for one surface.
///
/// The payload is pre-serialized JSON: serializing once per subscription
/// and shipping a string is much cheaper for the receiving side than deep
/// structured clones.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMessage {
    pub event: String,
    pub json: String,
}

/// A UI endpoint the broker can deliver to and observe.
pub trait Surface: Send + Sync {
    fn id(&self) -> &str;
    fn is_visible(&self) -> bool;
    fn is_minimized(&self) -> bool;

    /// Best-effort delivery; failures are isolated per subscription.
    fn send(&self, message: SurfaceMessage) -> Result<()>;

    /// Register a lifecycle-signal callback; the returned id removes it.
    fn on(&self, signal: SurfaceSignal, callback: SignalCallback) -> BindingId;
    fn off(&self, signal: SurfaceSignal, binding: BindingId);
}

// ─────────────────────────────────────────────────────────────────
// SignalOutlet
// ─────────────────────────────────────────────────────────────────

/// Signal dispatch table for surface implementations.
///
/// Window-manager adapters embed one and delegate `on`/`off` to it; the
/// adapter calls [`SignalOutlet::raise`] when the underlying window emits
/// a lifecycle event.
#[derive(Default)]
pub struct SignalOutlet {
    next_binding: AtomicU64,
    table: Mutex<HashMap<SurfaceSignal, Vec<(BindingId, SignalCallback)>>>,
}

impl SignalOutlet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, signal: SurfaceSignal, callback: SignalCallback) -> BindingId {
        let id = self.next_binding.fetch_add(1, Ordering::SeqCst) + 1;
        self.table
            .lock()
            .expect("signal table poisoned")
            .entry(signal)
            .or_default()
            .push((id, callback));
        id
    }

    pub fn off(&self, signal: SurfaceSignal, binding: BindingId) {
        let mut table = self.table.lock().expect("signal table poisoned");
        if let Some(entries) = table.get_mut(&signal) {
            entries.retain(|(id, _)| *id != binding);
            if entries.is_empty() {
                table.remove(&signal);
            }
        }
    }

    /// Dispatch a raised signal to all bindings.
    ///
    /// Bindings are snapshotted first so a callback may unbind (its own
    /// teardown path does) without deadlocking the dispatch.
    pub fn raise(&self, signal: SurfaceSignal) {
        let snapshot: Vec<SignalCallback> = {
            let table = self.table.lock().expect("signal table poisoned");
            match table.get(&signal) {
                Some(entries) => entries.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for callback in snapshot {
            callback();
        }
    }

    pub fn binding_count(&self, signal: SurfaceSignal) -> usize {
        self.table
            .lock()
            .expect("signal table poisoned")
            .get(&signal)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total bindings across all signals
    pub fn total_bindings(&self) -> usize {
        self.table
            .lock()
            .expect("signal table poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }
}
