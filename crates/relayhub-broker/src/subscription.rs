//! Subscription identity and lifecycle state machine.

use std::sync::Arc;

use relayhub_core::prelude::*;

use crate::source::{EventCallback, EventSource, ListenerId, SourceKey};
use crate::surface::{BindingId, Surface, SurfaceId, SurfaceSignal};

/// Key of one subscription: (surface identity, source key, event name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubKey {
    pub surface: SurfaceId,
    pub source: SourceKey,
    pub event: String,
}

impl std::fmt::Display for SubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.source, self.event, self.surface)
    }
}

/// Lifecycle state: torn-down → active ⇄ suspended → torn-down(final)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    Active,
    Suspended,
    TornDown,
}

/// One (surface, source, event) binding.
///
/// Invariant: the forwarding callback is attached to the source at most
/// once at any time. `resume`/`suspend` are membership-guarded by `state`,
/// so redundant calls never double-register or double-detach.
pub(crate) struct Subscription {
    key: SubKey,
    persistent: bool,
    state: SubState,
    listener_id: ListenerId,
    source: Arc<dyn EventSource>,
    surface: Arc<dyn Surface>,
    forward: EventCallback,
    bindings: Vec<(SurfaceSignal, BindingId)>,
}

impl Subscription {
    pub(crate) fn new(
        key: SubKey,
        persistent: bool,
        listener_id: ListenerId,
        source: Arc<dyn EventSource>,
        surface: Arc<dyn Surface>,
        forward: EventCallback,
    ) -> Self {
        Self {
            key,
            persistent,
            state: SubState::Suspended,
            listener_id,
            source,
            surface,
            forward,
            bindings: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> SubState {
        self.state
    }

    pub(crate) fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub(crate) fn set_bindings(&mut self, bindings: Vec<(SurfaceSignal, BindingId)>) {
        self.bindings = bindings;
    }

    /// Attach the forwarding callback. No-op when already active or torn
    /// down; `reason` is None for the initial attach at creation.
    pub(crate) fn resume(&mut self, reason: Option<&str>) {
        if self.state != SubState::Suspended {
            return;
        }
        match reason {
            Some(who) => debug!("Resume subscription: {} ({who})", self.key),
            None => debug!("Startup subscription: {}", self.key),
        }
        self.source
            .add_listener(&self.key.event, self.listener_id, self.forward.clone());
        self.state = SubState::Active;
    }

    /// Detach the forwarding callback. No-op unless active.
    pub(crate) fn suspend(&mut self, reason: &str) {
        if self.state != SubState::Active {
            return;
        }
        debug!("Suspending subscription: {} ({reason})", self.key);
        self.source.remove_listener(&self.key.event, self.listener_id);
        self.state = SubState::Suspended;
    }

    /// Terminal: detach, unbind every signal binding installed on the
    /// surface, and refuse all further transitions.
    pub(crate) fn teardown(&mut self) {
        if self.state == SubState::TornDown {
            return;
        }
        self.source.remove_listener(&self.key.event, self.listener_id);
        for (signal, binding) in self.bindings.drain(..) {
            self.surface.off(signal, binding);
        }
        self.state = SubState::TornDown;
        // Log last: the logs source would otherwise observe its own
        // teardown mid-detach.
        debug!("Shutdown subscription: {}", self.key);
    }
}
