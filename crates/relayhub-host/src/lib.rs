//! # relayhub-host - Host Services and Orchestration
//!
//! Everything the host process runs besides the broker itself:
//!
//! - [`logs`] - process-wide log capture (tracing layer, bounded history,
//!   rotating log file) feeding the `logs` source
//! - [`storage`] / [`settings`] - persisted key/value state with sticky
//!   defaults and change notification on the `app` source
//! - [`metrics`] - coalesced host metrics polling
//! - [`instance`] - single-instance lock negotiation (probe/quit claims)
//! - [`gameconn`] - lifecycle of the optional game-connection sub-service
//! - [`procedures`] - the named procedure registry exposed to surfaces
//! - [`supervisor`] - top-level wiring and the host run loop

pub mod config;
pub mod gameconn;
pub mod instance;
pub mod logs;
pub mod metrics;
pub mod procedures;
pub mod prompt;
pub mod settings;
pub mod storage;
pub mod supervisor;

pub use config::{HostConfig, HostPaths};
pub use gameconn::{GameConnectionService, GameConnectionSupervisor, StatusReporter};
pub use instance::{InstanceChoice, InstanceCoordinator, LockToken, Negotiation, QuitWatcher};
pub use logs::{rotate_log_files, LogHistory, HISTORY_CAPACITY, LOG_FILE_NAME};
pub use metrics::{MetricsCoalescer, MetricsProvider, MetricsSnapshot, SystemMetricsProvider};
pub use procedures::ProcedureRegistry;
pub use prompt::{ConsolePrompt, HeadlessPrompt, OperatorPrompt};
pub use settings::SettingsStore;
pub use storage::{JsonFileStorage, Storage};
pub use supervisor::{run_host, HostCommand, HostOptions, HostSupervisor, APP_VERSION};
