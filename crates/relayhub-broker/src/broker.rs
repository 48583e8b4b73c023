//! The subscription broker: N sources × M surfaces.
//!
//! Each subscription's state is guarded independently (per-key mutex), so
//! transitions on different keys proceed concurrently while a single key's
//! transitions always execute to completion without interleaving. Lock
//! order is: subscription before table, and table locks are never held
//! while waiting on a subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use relayhub_core::prelude::*;
use serde::Serialize;

use crate::source::{EventCallback, EventSource, SourceKey};
use crate::subscription::{SubKey, SubState, Subscription};
use crate::surface::{Surface, SurfaceMessage, SurfaceSignal};

/// Subscription counts for the debug snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub subscriptions: usize,
    pub active: usize,
    pub suspended: usize,
    pub persistent: usize,
    pub by_source: HashMap<String, usize>,
}

/// Owns the (source, event, surface) subscription table and reacts to
/// surface visibility transitions and destruction.
///
/// Sources are owned externally; the broker holds shared references keyed
/// by [`SourceKey`], registered once at host startup.
#[derive(Default)]
pub struct SubscriptionBroker {
    sources: RwLock<HashMap<SourceKey, Arc<dyn EventSource>>>,
    subs: Mutex<HashMap<SubKey, Arc<Mutex<Subscription>>>>,
    next_listener: AtomicU64,
}

impl SubscriptionBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an event source under its key. Re-registering a key
    /// replaces the previous source for future subscriptions.
    pub fn register_source(&self, key: SourceKey, source: Arc<dyn EventSource>) {
        let previous = self
            .sources
            .write()
            .expect("source registry poisoned")
            .insert(key.clone(), source);
        if previous.is_some() {
            debug!("Replaced event source: {key}");
        }
    }

    /// Look up a registered source
    pub fn source(&self, key: &SourceKey) -> Option<Arc<dyn EventSource>> {
        self.sources
            .read()
            .expect("source registry poisoned")
            .get(key)
            .cloned()
    }

    /// Create a subscription for `surface` on `(source, event)`.
    ///
    /// The initial state is active when the surface is visible and not
    /// minimized, or when `persistent` is set; otherwise suspended.
    /// Subscribing a key that already exists is a no-op (the at-most-one
    /// forwarding callback invariant). Unknown sources fail.
    pub fn subscribe(
        self: &Arc<Self>,
        surface: Arc<dyn Surface>,
        source: SourceKey,
        event: &str,
        persistent: bool,
    ) -> Result<()> {
        let src = self
            .source(&source)
            .ok_or_else(|| Error::unknown_source(source.as_str()))?;
        let key = SubKey {
            surface: surface.id().to_string(),
            source,
            event: event.to_string(),
        };

        let listener_id = self.next_listener.fetch_add(1, Ordering::SeqCst) + 1;
        let forward = Self::forwarder(surface.clone(), event.to_string(), key.to_string());
        let entry = Arc::new(Mutex::new(Subscription::new(
            key.clone(),
            persistent,
            listener_id,
            src,
            surface.clone(),
            forward,
        )));

        // Hold the new subscription's lock through setup so a racing
        // destroy signal observes either nothing or the fully-built entry.
        let mut sub = entry.lock().expect("subscription poisoned");
        {
            let mut subs = self.subs.lock().expect("subscription table poisoned");
            if subs.contains_key(&key) {
                debug!("Subscription already present: {key}");
                return Ok(());
            }
            subs.insert(key.clone(), entry.clone());
        }

        if persistent || (surface.is_visible() && !surface.is_minimized()) {
            sub.resume(None);
        }

        let mut bindings = Vec::new();
        for signal in SurfaceSignal::SHUTDOWN {
            let broker = Arc::downgrade(self);
            let key = key.clone();
            bindings.push((
                signal,
                surface.on(
                    signal,
                    Arc::new(move || {
                        if let Some(broker) = broker.upgrade() {
                            broker.teardown_key(&key);
                        }
                    }),
                ),
            ));
        }
        if !persistent {
            for signal in SurfaceSignal::RESUME {
                let broker = Arc::downgrade(self);
                let key = key.clone();
                bindings.push((
                    signal,
                    surface.on(
                        signal,
                        Arc::new(move || {
                            if let Some(broker) = broker.upgrade() {
                                broker.resume_subscription(&key, signal.as_str());
                            }
                        }),
                    ),
                ));
            }
            for signal in SurfaceSignal::SUSPEND {
                let broker = Arc::downgrade(self);
                let key = key.clone();
                bindings.push((
                    signal,
                    surface.on(
                        signal,
                        Arc::new(move || {
                            if let Some(broker) = broker.upgrade() {
                                broker.suspend_subscription(&key, signal.as_str());
                            }
                        }),
                    ),
                ));
            }
        }
        sub.set_bindings(bindings);
        Ok(())
    }

    /// Tear down one subscription; no-op when the key is unknown.
    pub fn unsubscribe(&self, key: &SubKey) {
        self.teardown_key(key);
    }

    /// Explicitly resume a subscription (applies to persistent ones too).
    /// No-op on unknown keys: teardown races with late signals are expected.
    pub fn resume_subscription(&self, key: &SubKey, reason: &str) {
        if let Some(entry) = self.entry(key) {
            entry
                .lock()
                .expect("subscription poisoned")
                .resume(Some(reason));
        }
    }

    /// Explicitly suspend a subscription. No-op on unknown keys.
    pub fn suspend_subscription(&self, key: &SubKey, reason: &str) {
        if let Some(entry) = self.entry(key) {
            entry.lock().expect("subscription poisoned").suspend(reason);
        }
    }

    /// Tear down every subscription owned by `surface`.
    pub fn teardown_surface(&self, surface: &str) {
        let keys: Vec<SubKey> = {
            let subs = self.subs.lock().expect("subscription table poisoned");
            subs.keys().filter(|k| k.surface == surface).cloned().collect()
        };
        for key in keys {
            self.teardown_key(&key);
        }
    }

    /// Current state of one subscription, if it exists
    pub fn subscription_state(&self, key: &SubKey) -> Option<SubState> {
        self.entry(key)
            .map(|entry| entry.lock().expect("subscription poisoned").state())
    }

    pub fn stats(&self) -> BrokerStats {
        let entries: Vec<(SubKey, Arc<Mutex<Subscription>>)> = {
            let subs = self.subs.lock().expect("subscription table poisoned");
            subs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut stats = BrokerStats {
            subscriptions: entries.len(),
            ..Default::default()
        };
        for (key, entry) in entries {
            let sub = entry.lock().expect("subscription poisoned");
            match sub.state() {
                SubState::Active => stats.active += 1,
                SubState::Suspended => stats.suspended += 1,
                SubState::TornDown => {}
            }
            if sub.is_persistent() {
                stats.persistent += 1;
            }
            *stats.by_source.entry(key.source.to_string()).or_default() += 1;
        }
        stats
    }

    fn entry(&self, key: &SubKey) -> Option<Arc<Mutex<Subscription>>> {
        self.subs
            .lock()
            .expect("subscription table poisoned")
            .get(key)
            .cloned()
    }

    fn teardown_key(&self, key: &SubKey) {
        let entry = {
            self.subs
                .lock()
                .expect("subscription table poisoned")
                .remove(key)
        };
        if let Some(entry) = entry {
            entry.lock().expect("subscription poisoned").teardown();
        }
    }

    /// Build the forwarding callback bound to one subscription.
    ///
    /// Serializes once per delivery and ships a string; a failing send is
    /// logged and dropped so one broken surface cannot affect the others.
    fn forwarder(surface: Arc<dyn Surface>, event: String, key_label: String) -> EventCallback {
        Arc::new(move |payload| {
            let json = match serde_json::to_string(payload) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Unserializable event for {key_label}: {e}");
                    return;
                }
            };
            if let Err(e) = surface.send(SurfaceMessage {
                event: event.clone(),
                json,
            }) {
                debug!("Dropped delivery for {key_label}: {e}");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EventHub;
    use crate::test_utils::FakeSurface;

    fn broker_with_hub() -> (Arc<SubscriptionBroker>, Arc<EventHub>) {
        let broker = SubscriptionBroker::new();
        let hub = Arc::new(EventHub::new());
        broker.register_source(SourceKey::Telemetry, hub.clone());
        (broker, hub)
    }

    fn key_for(surface: &Arc<FakeSurface>) -> SubKey {
        SubKey {
            surface: surface.id().to_string(),
            source: SourceKey::Telemetry,
            event: "tick".to_string(),
        }
    }

    #[test]
    fn test_unknown_source_rejected() {
        let broker = SubscriptionBroker::new();
        let surface = FakeSurface::new("overlay-1");
        let err = broker
            .subscribe(surface, SourceKey::from("nope"), "tick", false)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSource { .. }));
    }

    #[test]
    fn test_visible_surface_starts_active() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        assert_eq!(
            broker.subscription_state(&key_for(&surface)),
            Some(SubState::Active)
        );
        hub.emit("tick", &serde_json::json!({"watts": 250}));
        assert_eq!(surface.sent_count(), 1);
        assert_eq!(surface.sent()[0].event, "tick");
        assert!(surface.sent()[0].json.contains("250"));
    }

    #[test]
    fn test_hidden_surface_starts_suspended() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::hidden("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        assert_eq!(
            broker.subscription_state(&key_for(&surface)),
            Some(SubState::Suspended)
        );
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 0);
    }

    #[test]
    fn test_redundant_resume_never_double_attaches() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        let key = key_for(&surface);

        broker.resume_subscription(&key, "shown");
        broker.resume_subscription(&key, "restored");
        surface.raise(SurfaceSignal::Shown);
        surface.raise(SurfaceSignal::Restored);

        assert_eq!(hub.listener_count("tick"), 1);
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 1);
    }

    #[test]
    fn test_visibility_round_trip_drops_hidden_events() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        hub.emit("tick", &serde_json::json!({"n": 1}));
        surface.raise(SurfaceSignal::Hidden);
        hub.emit("tick", &serde_json::json!({"n": 2}));
        surface.raise(SurfaceSignal::Shown);
        hub.emit("tick", &serde_json::json!({"n": 3}));

        let sent = surface.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].json.contains("1"));
        assert!(sent[1].json.contains("3"));
    }

    #[test]
    fn test_minimize_restore_transitions() {
        let (broker, _hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        let key = key_for(&surface);

        surface.raise(SurfaceSignal::Minimized);
        assert_eq!(broker.subscription_state(&key), Some(SubState::Suspended));
        surface.raise(SurfaceSignal::Restored);
        assert_eq!(broker.subscription_state(&key), Some(SubState::Active));
    }

    #[test]
    fn test_persistent_ignores_visibility() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::hidden("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", true)
            .unwrap();
        let key = key_for(&surface);

        // Active despite the surface being hidden at creation
        assert_eq!(broker.subscription_state(&key), Some(SubState::Active));

        surface.raise(SurfaceSignal::Hidden);
        surface.raise(SurfaceSignal::Minimized);
        assert_eq!(broker.subscription_state(&key), Some(SubState::Active));
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 1);

        // Explicit API calls still apply
        broker.suspend_subscription(&key, "api");
        assert_eq!(broker.subscription_state(&key), Some(SubState::Suspended));
        broker.resume_subscription(&key, "api");
        assert_eq!(broker.subscription_state(&key), Some(SubState::Active));
    }

    #[test]
    fn test_duplicate_subscribe_is_noop() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        assert_eq!(hub.listener_count("tick"), 1);
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 1);
    }

    #[test]
    fn test_destroy_tears_down_and_unbinds() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        let key = key_for(&surface);

        surface.raise(SurfaceSignal::Destroyed);

        assert_eq!(broker.subscription_state(&key), None);
        assert_eq!(surface.total_bindings(), 0);
        assert_eq!(hub.listener_count("tick"), 0);

        // Late signals after teardown: no callback invocation, no
        // re-registration
        surface.raise(SurfaceSignal::Shown);
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 0);
        assert_eq!(hub.listener_count("tick"), 0);
    }

    #[test]
    fn test_reload_tears_down() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        surface.raise(SurfaceSignal::StartedReload);

        assert_eq!(broker.subscription_state(&key_for(&surface)), None);
        assert_eq!(hub.listener_count("tick"), 0);
        assert_eq!(surface.total_bindings(), 0);
    }

    #[test]
    fn test_hidden_then_destroyed_never_transiently_active() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        surface.raise(SurfaceSignal::Hidden);
        surface.raise(SurfaceSignal::Destroyed);

        assert_eq!(broker.subscription_state(&key_for(&surface)), None);
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 0);
    }

    #[test]
    fn test_unsubscribe_single_key() {
        let (broker, hub) = broker_with_hub();
        let surface = FakeSurface::new("overlay-1");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        let key = key_for(&surface);

        broker.unsubscribe(&key);
        assert_eq!(broker.subscription_state(&key), None);
        assert_eq!(hub.listener_count("tick"), 0);

        // Defensive: a second unsubscribe of the same key is a no-op
        broker.unsubscribe(&key);
    }

    #[test]
    fn test_teardown_surface_tears_all_its_subscriptions() {
        let (broker, hub) = broker_with_hub();
        broker.register_source(SourceKey::Logs, Arc::new(EventHub::new()));
        let surface = FakeSurface::new("overlay-1");
        let other = FakeSurface::new("overlay-2");
        broker
            .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        broker
            .subscribe(surface.clone(), SourceKey::Logs, "message", false)
            .unwrap();
        broker
            .subscribe(other.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        broker.teardown_surface("overlay-1");

        assert_eq!(broker.stats().subscriptions, 1);
        hub.emit("tick", &serde_json::json!({}));
        assert_eq!(surface.sent_count(), 0);
        assert_eq!(other.sent_count(), 1);
    }

    #[test]
    fn test_failing_surface_is_isolated() {
        let (broker, hub) = broker_with_hub();
        let broken = FakeSurface::new("overlay-1");
        let healthy = FakeSurface::new("overlay-2");
        broken.fail_sends();
        broker
            .subscribe(broken.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        broker
            .subscribe(healthy.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();

        hub.emit("tick", &serde_json::json!({}));

        assert_eq!(broken.sent_count(), 0);
        assert_eq!(healthy.sent_count(), 1);
    }

    #[test]
    fn test_stats_counts_by_source_and_state() {
        let (broker, _hub) = broker_with_hub();
        broker.register_source(SourceKey::Logs, Arc::new(EventHub::new()));
        let visible = FakeSurface::new("overlay-1");
        let hidden = FakeSurface::hidden("overlay-2");
        broker
            .subscribe(visible.clone(), SourceKey::Telemetry, "tick", false)
            .unwrap();
        broker
            .subscribe(hidden.clone(), SourceKey::Logs, "message", false)
            .unwrap();

        broker
            .subscribe(hidden.clone(), SourceKey::Telemetry, "status", true)
            .unwrap();

        let stats = broker.stats();
        assert_eq!(stats.subscriptions, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.suspended, 1);
        assert_eq!(stats.persistent, 1);
        assert_eq!(stats.by_source.get("telemetry"), Some(&2));
        assert_eq!(stats.by_source.get("logs"), Some(&1));
    }

    #[test]
    fn test_operations_on_missing_key_are_noops() {
        let (broker, _hub) = broker_with_hub();
        let key = SubKey {
            surface: "ghost".to_string(),
            source: SourceKey::Telemetry,
            event: "tick".to_string(),
        };
        broker.resume_subscription(&key, "shown");
        broker.suspend_subscription(&key, "hidden");
        broker.unsubscribe(&key);
        assert_eq!(broker.subscription_state(&key), None);
    }
}
