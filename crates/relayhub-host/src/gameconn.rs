//! Lifecycle of the optional real-time game-connection sub-service.
//!
//! The wire protocol is an external collaborator behind
//! [`GameConnectionService`]; the supervisor owns start/stop, tracks the
//! latest status, and feeds status reports into the `gameConnection`
//! source. The hub is registered even when the feature is disabled so
//! surfaces subscribing to it never hit an unknown source.

use std::sync::{Arc, Mutex};

use relayhub_broker::EventHub;
use relayhub_core::prelude::*;
use relayhub_core::{ConnectionState, ConnectionStatus};

/// The external game-connection service seam
pub trait GameConnectionService: Send + Sync {
    /// Start the service; status transitions flow through `reporter`.
    fn start(&self, reporter: StatusReporter) -> Result<()>;
    fn stop(&self);
}

/// Handle a service uses to publish status transitions
#[derive(Clone)]
pub struct StatusReporter {
    hub: Arc<EventHub>,
    current: Arc<Mutex<ConnectionStatus>>,
}

impl StatusReporter {
    pub fn report(&self, status: ConnectionStatus) {
        debug!("Game connection status: {:?}", status.state);
        *self.current.lock().expect("status poisoned") = status.clone();
        if let Ok(payload) = serde_json::to_value(&status) {
            self.hub.emit("status", &payload);
        }
    }
}

/// Owns the optional sub-service and its source hub.
pub struct GameConnectionSupervisor {
    hub: Arc<EventHub>,
    current: Arc<Mutex<ConnectionStatus>>,
    service: Mutex<Option<Arc<dyn GameConnectionService>>>,
}

impl Default for GameConnectionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl GameConnectionSupervisor {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(EventHub::new()),
            current: Arc::new(Mutex::new(ConnectionStatus::disabled())),
            service: Mutex::new(None),
        }
    }

    /// The `gameConnection` source hub (registered with the broker even
    /// when no service runs)
    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.current.lock().expect("status poisoned").clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.service.lock().expect("service poisoned").is_some()
    }

    fn reporter(&self) -> StatusReporter {
        StatusReporter {
            hub: self.hub.clone(),
            current: self.current.clone(),
        }
    }

    /// Start the sub-service. The supervisor reports `Connecting`; further
    /// transitions come from the service itself.
    pub fn enable(&self, service: Arc<dyn GameConnectionService>) -> Result<()> {
        let reporter = self.reporter();
        reporter.report(ConnectionStatus {
            state: ConnectionState::Connecting,
            detail: None,
        });
        service.start(reporter)?;
        *self.service.lock().expect("service poisoned") = Some(service);
        info!("Game connection service started");
        Ok(())
    }

    /// Stop the sub-service if one is running; idempotent.
    pub fn stop(&self) {
        let service = self.service.lock().expect("service poisoned").take();
        if let Some(service) = service {
            service.stop();
            self.reporter().report(ConnectionStatus::disconnected("stopped"));
            info!("Game connection service stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhub_broker::EventSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeService {
        reporter: Mutex<Option<StatusReporter>>,
        stops: AtomicUsize,
    }

    impl FakeService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reporter: Mutex::new(None),
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl GameConnectionService for FakeService {
        fn start(&self, reporter: StatusReporter) -> Result<()> {
            *self.reporter.lock().unwrap() = Some(reporter);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_disabled_status_by_default() {
        let supervisor = GameConnectionSupervisor::new();
        assert_eq!(supervisor.status().state, ConnectionState::Disabled);
        assert!(!supervisor.is_enabled());
    }

    #[test]
    fn test_disabled_hub_is_still_subscribable() {
        let supervisor = GameConnectionSupervisor::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_ref = hits.clone();
        supervisor.hub().add_listener(
            "status",
            1,
            Arc::new(move |_| {
                hits_ref.fetch_add(1, Ordering::SeqCst);
            }),
        );
        // No events while disabled, but attaching is fine
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enable_reports_connecting_then_service_transitions() {
        let supervisor = GameConnectionSupervisor::new();
        let service = FakeService::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ref = seen.clone();
        supervisor.hub().add_listener(
            "status",
            1,
            Arc::new(move |payload| seen_ref.lock().unwrap().push(payload["state"].clone())),
        );

        supervisor.enable(service.clone()).unwrap();
        assert!(supervisor.is_enabled());
        assert_eq!(supervisor.status().state, ConnectionState::Connecting);

        let reporter = service.reporter.lock().unwrap().clone().unwrap();
        reporter.report(ConnectionStatus::connected());
        assert_eq!(supervisor.status().state, ConnectionState::Connected);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![serde_json::json!("connecting"), serde_json::json!("connected")]
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let supervisor = GameConnectionSupervisor::new();
        let service = FakeService::new();
        supervisor.enable(service.clone()).unwrap();

        supervisor.stop();
        supervisor.stop();

        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
        assert!(!supervisor.is_enabled());
        assert_eq!(supervisor.status().state, ConnectionState::Disconnected);
    }
}
