//! Top-level orchestration.
//!
//! [`run_host`] drives the whole startup sequence: rotate and install log
//! capture, negotiate the single-instance lock, validate storage, build
//! the singletons, register sources and procedures, then sit in the run
//! loop until a quit/restart command, a quit claim from a competing
//! instance, or an interrupt.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relayhub_broker::{EventHub, SourceKey, SubscriptionBroker};
use relayhub_core::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::{HostConfig, HostPaths};
use crate::gameconn::{GameConnectionService, GameConnectionSupervisor};
use crate::instance::{InstanceCoordinator, Negotiation, QuitWatcher};
use crate::logs::{self, rotate_log_files, LogHistory};
use crate::metrics::{MetricsCoalescer, SystemMetricsProvider};
use crate::procedures::ProcedureRegistry;
use crate::prompt::{ConsolePrompt, HeadlessPrompt, OperatorPrompt};
use crate::settings::SettingsStore;
use crate::storage::{JsonFileStorage, Storage};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commands accepted by the run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Quit,
    Restart,
}

/// Startup options from the CLI
pub struct HostOptions {
    pub data_dir: Option<PathBuf>,
    pub headless: bool,
    /// Wire service for the game connection, linked by the embedder.
    /// `None` leaves the feature off even when enabled in settings.
    pub game_service: Option<Arc<dyn GameConnectionService>>,
}

/// Owns the host singletons and exposes the procedure registry.
///
/// Everything is explicitly constructed here and passed by reference to
/// dependents; there is no ambient global state besides the tracing
/// subscriber itself.
pub struct HostSupervisor {
    paths: HostPaths,
    started_at: std::time::Instant,
    install_id: String,
    broker: Arc<SubscriptionBroker>,
    storage: Arc<JsonFileStorage>,
    settings: Arc<SettingsStore>,
    history: Arc<LogHistory>,
    metrics: Arc<MetricsCoalescer<SystemMetricsProvider>>,
    instance: Arc<InstanceCoordinator>,
    gameconn: Arc<GameConnectionSupervisor>,
    procedures: Arc<ProcedureRegistry>,
    windows_hub: Arc<EventHub>,
    telemetry_hub: Arc<EventHub>,
    prompt: Arc<dyn OperatorPrompt>,
    commands: UnboundedSender<HostCommand>,
}

impl HostSupervisor {
    /// Build the supervisor and register sources and procedures.
    /// Duplicate procedure names fail here, at startup.
    pub fn build(
        paths: HostPaths,
        config: &HostConfig,
        history: Arc<LogHistory>,
        logs_hub: Arc<EventHub>,
        storage: Arc<JsonFileStorage>,
        instance: Arc<InstanceCoordinator>,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Result<(Arc<Self>, UnboundedReceiver<HostCommand>)> {
        let broker = SubscriptionBroker::new();
        let settings = Arc::new(SettingsStore::new(
            storage.clone() as Arc<dyn Storage>,
            Arc::new(EventHub::new()),
        ));
        let gameconn = Arc::new(GameConnectionSupervisor::new());
        let metrics = Arc::new(MetricsCoalescer::new(
            SystemMetricsProvider::new(),
            Duration::from_millis(config.metrics.min_interval_ms),
        ));
        let windows_hub = Arc::new(EventHub::new());
        let telemetry_hub = Arc::new(EventHub::new());

        broker.register_source(SourceKey::Logs, logs_hub);
        broker.register_source(SourceKey::App, settings.hub());
        broker.register_source(SourceKey::Windows, windows_hub.clone());
        broker.register_source(SourceKey::GameConnection, gameconn.hub());
        broker.register_source(SourceKey::Telemetry, telemetry_hub.clone());

        let install_id = ensure_install_id(storage.as_ref())?;
        let (commands, commands_rx) = unbounded_channel();

        let supervisor = Arc::new(Self {
            paths,
            started_at: std::time::Instant::now(),
            install_id,
            broker,
            storage,
            settings,
            history,
            metrics,
            instance,
            gameconn,
            procedures: Arc::new(ProcedureRegistry::new()),
            windows_hub,
            telemetry_hub,
            prompt,
            commands,
        });
        supervisor.register_core_procedures()?;
        supervisor.note_version_transition()?;
        Ok((supervisor, commands_rx))
    }

    pub fn broker(&self) -> Arc<SubscriptionBroker> {
        self.broker.clone()
    }

    pub fn procedures(&self) -> Arc<ProcedureRegistry> {
        self.procedures.clone()
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        self.settings.clone()
    }

    pub fn gameconn(&self) -> Arc<GameConnectionSupervisor> {
        self.gameconn.clone()
    }

    /// Hub the window manager feeds `windows` source events into
    pub fn windows_hub(&self) -> Arc<EventHub> {
        self.windows_hub.clone()
    }

    /// Hub the telemetry/statistics processor feeds into
    pub fn telemetry_hub(&self) -> Arc<EventHub> {
        self.telemetry_hub.clone()
    }

    pub fn command_sender(&self) -> UnboundedSender<HostCommand> {
        self.commands.clone()
    }

    /// Start the game-connection service when enabled in settings.
    pub fn maybe_start_game_connection(
        &self,
        service: Option<Arc<dyn GameConnectionService>>,
    ) -> Result<()> {
        if !self.settings.get_bool("gameConnectionEnabled")? {
            return Ok(());
        }
        match service {
            Some(service) => self.gameconn.enable(service),
            None => {
                warn!("Game connection enabled but no service is linked");
                Ok(())
            }
        }
    }

    /// Sit until a quit/restart command or an interrupt. Quit claims from
    /// competing instances arrive as [`HostCommand::Quit`] via the
    /// watcher forwarder.
    pub async fn run(&self, mut commands: UnboundedReceiver<HostCommand>) -> Result<i32> {
        info!("relay-hub running (pid {})", std::process::id());
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HostCommand::Quit) | None => {
                        info!("Quit requested");
                        self.gameconn.stop();
                        return Ok(0);
                    }
                    Some(HostCommand::Restart) => {
                        info!("Restart requested");
                        self.gameconn.stop();
                        relaunch();
                        return Ok(0);
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received");
                    self.gameconn.stop();
                    return Ok(0);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Procedures
    // ─────────────────────────────────────────────────────────────

    fn register_core_procedures(self: &Arc<Self>) -> Result<()> {
        let registry = &self.procedures;

        let history = self.history.clone();
        registry.register_sync("getLogs", move |_params| {
            Ok(serde_json::to_value(history.read_all())?)
        })?;

        let history = self.history.clone();
        registry.register_sync("clearLogs", move |_params| {
            history.clear();
            Ok(Value::Null)
        })?;

        let log_file = self.paths.log_file.clone();
        registry.register_sync("showLogInFolder", move |_params| {
            Ok(json!(log_file.display().to_string()))
        })?;

        let commands = self.commands.clone();
        registry.register_sync("quit", move |_params| {
            commands
                .send(HostCommand::Quit)
                .map_err(|_| Error::ChannelClosed)?;
            Ok(Value::Null)
        })?;

        let commands = self.commands.clone();
        registry.register_sync("restart", move |_params| {
            commands
                .send(HostCommand::Restart)
                .map_err(|_| Error::ChannelClosed)?;
            Ok(Value::Null)
        })?;

        let settings = self.settings.clone();
        registry.register_sync("getSetting", move |params| {
            let params: GetSettingParams = parse_params(params)?;
            match params.default {
                Some(default) => Ok(settings.get_or(&params.key, default)?),
                None => Ok(settings.get(&params.key)?.unwrap_or(Value::Null)),
            }
        })?;

        let settings = self.settings.clone();
        registry.register_sync("setSetting", move |params| {
            let params: SetSettingParams = parse_params(params)?;
            settings.set(&params.key, params.value)?;
            Ok(Value::Null)
        })?;

        let metrics = self.metrics.clone();
        registry.register("pollMetrics", move |_params| {
            let metrics = metrics.clone();
            Box::pin(async move { Ok(serde_json::to_value(metrics.poll().await)?) })
        })?;

        let supervisor = Arc::downgrade(self);
        registry.register("getDebugInfo", move |_params| {
            let supervisor = supervisor.clone();
            Box::pin(async move {
                let supervisor = supervisor.upgrade().ok_or(Error::ChannelClosed)?;
                supervisor.debug_snapshot().await
            })
        })?;

        let instance = self.instance.clone();
        registry.register_sync("getInstanceInfo", move |_params| {
            Ok(serde_json::to_value(instance.journal())?)
        })?;

        let instance = self.instance.clone();
        registry.register_sync("clearInstanceInfo", move |_params| {
            instance.clear_journal();
            Ok(Value::Null)
        })?;

        registry.register_sync("getVersion", |_params| Ok(json!(APP_VERSION)))?;

        let gameconn = self.gameconn.clone();
        registry.register_sync("getGameConnectionStatus", move |_params| {
            Ok(serde_json::to_value(gameconn.status())?)
        })?;

        let supervisor = Arc::downgrade(self);
        registry.register_sync("resetStorageState", move |_params| {
            let supervisor = supervisor.upgrade().ok_or(Error::ChannelClosed)?;
            let reason = Error::storage("reset requested by operator");
            if !supervisor.prompt.confirm_storage_reset(&reason) {
                return Ok(json!(false));
            }
            warn!("Resetting state and restarting");
            supervisor.storage.reset()?;
            supervisor
                .commands
                .send(HostCommand::Restart)
                .map_err(|_| Error::ChannelClosed)?;
            Ok(json!(true))
        })?;

        Ok(())
    }

    async fn debug_snapshot(&self) -> Result<Value> {
        let metrics = self.metrics.poll().await;
        Ok(json!({
            "app": {
                "version": APP_VERSION,
                "pid": std::process::id(),
                "uptimeSecs": self.started_at.elapsed().as_secs(),
                "dataDir": self.paths.data_dir.display().to_string(),
                "installId": self.install_id,
            },
            "sys": {
                "platform": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "family": std::env::consts::FAMILY,
            },
            "metrics": serde_json::to_value(metrics)?,
            "broker": serde_json::to_value(self.broker.stats())?,
            "logs": {
                "historyLen": self.history.len(),
                "lastSeqno": self.history.last_seqno(),
                "file": self.paths.log_file.display().to_string(),
            },
            "gameConnection": serde_json::to_value(self.gameconn.status())?,
            "storageFile": self.storage.path().display().to_string(),
        }))
    }

    /// First-run and upgrade detection via the `lastVersion` setting.
    fn note_version_transition(&self) -> Result<()> {
        let last = self
            .settings
            .get("lastVersion")?
            .and_then(|value| value.as_str().map(String::from));
        match last.as_deref() {
            Some(version) if version == APP_VERSION => {}
            Some(version) => {
                info!("relay-hub updated: {version} -> {APP_VERSION}");
                self.settings.set("lastVersion", json!(APP_VERSION))?;
            }
            None => {
                info!("First run: welcome to relay-hub");
                self.settings.set("lastVersion", json!(APP_VERSION))?;
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct GetSettingParams {
    key: String,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Deserialize)]
struct SetSettingParams {
    key: String,
    value: Value,
}

fn parse_params<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::procedure_args(e.to_string()))
}

/// Anonymous id distinguishing installs in diagnostics; created once.
fn ensure_install_id(storage: &dyn Storage) -> Result<String> {
    if let Some(Value::String(id)) = storage.get("install-id")? {
        return Ok(id);
    }
    let bytes: [u8; 16] = rand::random();
    let id: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    storage.set("install-id", &json!(id))?;
    Ok(id)
}

/// Spawn the current executable again with the same arguments.
fn relaunch() {
    match std::env::current_exe() {
        Ok(exe) => {
            let args: Vec<String> = std::env::args().skip(1).collect();
            match std::process::Command::new(exe).args(args).spawn() {
                Ok(child) => info!("Relaunched as pid {}", child.id()),
                Err(e) => error!("Relaunch failed: {e}"),
            }
        }
        Err(e) => error!("Cannot locate current executable: {e}"),
    }
}

// ─────────────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────────────

/// Full host startup. Returns the process exit code: 0 for a normal quit
/// or a back-off during negotiation; 1 for storage corruption. Lock
/// takeover timeout surfaces as [`Error::LockTimeout`].
pub async fn run_host(options: HostOptions) -> Result<i32> {
    let prompt: Arc<dyn OperatorPrompt> = if options.headless {
        Arc::new(HeadlessPrompt)
    } else {
        Arc::new(ConsolePrompt)
    };

    let paths = HostPaths::resolve(options.data_dir);
    std::fs::create_dir_all(&paths.data_dir)?;
    let config = HostConfig::load(&paths.config_file);

    // Rotation failures (AV lock contention and friends) must not prevent
    // startup; the error is logged once capture is live.
    let rotate_err = rotate_log_files(&paths.data_dir, config.logs.limit).err();

    let logs_hub = Arc::new(EventHub::new());
    let history = logs::init(&paths.log_file, logs_hub.clone(), config.logs.filter.as_deref())?;
    info!("relay-hub {APP_VERSION} starting");
    info!("Log file: {}", paths.log_file.display());
    if let Some(e) = rotate_err {
        error!("Log rotate error: {e}");
    }

    let instance = Arc::new(InstanceCoordinator::new(&paths.data_dir));
    let token = match instance.negotiate(prompt.as_ref()).await? {
        Negotiation::BackOff => return Ok(0),
        Negotiation::Primary(token) => token,
    };

    let storage = Arc::new(JsonFileStorage::new(&paths.storage_file));
    if let Err(e) = storage.validate() {
        error!("Storage error: {e}");
        if prompt.confirm_storage_reset(&e) {
            storage.reset()?;
            relaunch();
        } else {
            prompt.fatal("Storage error", &e.to_string());
        }
        return Ok(1);
    }

    let (supervisor, commands_rx) =
        HostSupervisor::build(paths, &config, history, logs_hub, storage, instance, prompt)?;
    supervisor.maybe_start_game_connection(options.game_service)?;

    // Quit claims from a competing instance become ordinary quit commands.
    let (quit_tx, mut quit_rx) = unbounded_channel();
    let _quit_watcher = QuitWatcher::spawn(&supervisor.paths.data_dir, quit_tx)?;
    let forward = supervisor.command_sender();
    tokio::spawn(async move {
        while quit_rx.recv().await.is_some() {
            let _ = forward.send(HostCommand::Quit);
        }
    });

    let code = supervisor.run(commands_rx).await?;
    drop(token);
    Ok(code)
}
