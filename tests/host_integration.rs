//! Cross-crate flows: capture layer → broker → surface, settings change
//! notification, single-instance takeover, and the run loop.

use std::sync::Arc;
use std::time::Duration;

use relayhub_broker::test_utils::FakeSurface;
use relayhub_broker::{EventHub, SourceKey, SurfaceSignal};
use relayhub_core::Error;
use relayhub_host::logs::CaptureLayer;
use relayhub_host::{
    HostCommand, HostConfig, HostPaths, HostSupervisor, InstanceChoice, InstanceCoordinator,
    JsonFileStorage, LogHistory, Negotiation, OperatorPrompt, QuitWatcher, HISTORY_CAPACITY,
};
use serde_json::{json, Value};
use serial_test::serial;
use tracing_subscriber::layer::SubscriberExt;

struct TakeOverPrompt;

impl OperatorPrompt for TakeOverPrompt {
    fn instance_choice(&self) -> InstanceChoice {
        InstanceChoice::TakeOver
    }

    fn confirm_storage_reset(&self, _error: &Error) -> bool {
        false
    }

    fn fatal(&self, _title: &str, _message: &str) {}
}

fn build_host(
    dir: &std::path::Path,
) -> (
    Arc<HostSupervisor>,
    tokio::sync::mpsc::UnboundedReceiver<HostCommand>,
) {
    let paths = HostPaths::in_dir(dir);
    let config = HostConfig::default();
    let history = LogHistory::new(HISTORY_CAPACITY);
    let logs_hub = Arc::new(EventHub::new());
    let storage = Arc::new(JsonFileStorage::new(&paths.storage_file));
    let instance = Arc::new(InstanceCoordinator::new(&paths.data_dir));
    HostSupervisor::build(
        paths,
        &config,
        history,
        logs_hub,
        storage,
        instance,
        Arc::new(relayhub_host::HeadlessPrompt),
    )
    .unwrap()
}

#[tokio::test]
async fn setting_change_reaches_subscribed_surface() {
    let temp = tempfile::tempdir().unwrap();
    let (supervisor, _rx) = build_host(temp.path());
    let broker = supervisor.broker();

    let surface = FakeSurface::new("settings-panel");
    broker
        .subscribe(surface.clone(), SourceKey::App, "setting-change", false)
        .unwrap();

    supervisor
        .procedures()
        .call("setSetting", json!({"key": "webServerPort", "value": 9090}))
        .await
        .unwrap();

    let sent = surface.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "setting-change");
    let payload: Value = serde_json::from_str(&sent[0].json).unwrap();
    assert_eq!(payload["key"], "webServerPort");
    assert_eq!(payload["value"], 9090);
}

#[tokio::test]
async fn telemetry_flows_until_surface_destroyed() {
    let temp = tempfile::tempdir().unwrap();
    let (supervisor, _rx) = build_host(temp.path());
    let broker = supervisor.broker();
    let telemetry = supervisor.telemetry_hub();

    let surface = FakeSurface::new("overlay");
    broker
        .subscribe(surface.clone(), SourceKey::Telemetry, "tick", false)
        .unwrap();

    telemetry.emit("tick", &json!({"watts": 310}));
    assert_eq!(surface.sent_count(), 1);

    surface.raise(SurfaceSignal::Destroyed);
    telemetry.emit("tick", &json!({"watts": 311}));

    assert_eq!(surface.sent_count(), 1);
    assert_eq!(surface.total_bindings(), 0);
    assert_eq!(broker.stats().subscriptions, 0);
}

#[test]
fn captured_log_lines_reach_a_log_viewer_surface() {
    let temp = tempfile::tempdir().unwrap();
    let history = LogHistory::new(HISTORY_CAPACITY);
    let logs_hub = Arc::new(EventHub::new());
    let layer = CaptureLayer::new(
        &temp.path().join("relayhub.log"),
        history.clone(),
        logs_hub.clone(),
    )
    .unwrap();

    let broker = relayhub_broker::SubscriptionBroker::new();
    broker.register_source(SourceKey::Logs, logs_hub);
    let surface = FakeSurface::new("log-viewer");
    broker
        .subscribe(surface.clone(), SourceKey::Logs, "message", false)
        .unwrap();

    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!("relay established");
        tracing::warn!("telemetry gap");
    });

    let sent = surface.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|m| m.json.contains("relay established")));
    assert!(sent.iter().any(|m| m.json.contains("telemetry gap")));
    assert!(history.read_all().len() >= 2);
}

#[tokio::test]
#[serial]
async fn takeover_succeeds_when_holder_honors_quit_claim() {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = temp.path().to_path_buf();

    // First process: holds the lock and watches for quit claims.
    let holder = InstanceCoordinator::new(&data_dir);
    let token = holder.try_claim().unwrap().unwrap();
    let (quit_tx, mut quit_rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = QuitWatcher::spawn(&data_dir, quit_tx).unwrap();
    let honor = tokio::spawn(async move {
        quit_rx.recv().await;
        drop(token); // voluntary release, as a normal shutdown would
    });

    // Second process: probe denied, operator takes over.
    let contender = InstanceCoordinator::new(&data_dir);
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        contender.negotiate(&TakeOverPrompt),
    )
    .await
    .expect("negotiation timed out")
    .unwrap();

    assert!(matches!(outcome, Negotiation::Primary(_)));
    honor.await.unwrap();
}

#[tokio::test]
async fn quit_procedure_ends_run_loop_with_code_zero() {
    let temp = tempfile::tempdir().unwrap();
    let (supervisor, rx) = build_host(temp.path());

    let runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run(rx).await })
    };

    supervisor
        .procedures()
        .call("quit", Value::Null)
        .await
        .unwrap();

    let code = runner.await.unwrap().unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn unknown_source_subscription_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let (supervisor, _rx) = build_host(temp.path());

    let surface = FakeSurface::new("overlay");
    let err = supervisor
        .broker()
        .subscribe(surface, SourceKey::from("statsv2"), "tick", false)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownSource { .. }));
}
