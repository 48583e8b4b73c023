//! Single-instance coordination.
//!
//! The sole-instance claim is an exclusive lock on `relayhub.lock` in the
//! data directory. A competing process that wants the slot writes a
//! `relayhub.quit` sentinel (the "quit" claim) and polls the lock; the
//! holder watches for the sentinel and shuts down voluntarily. The
//! protocol is cooperative, not adversarial.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local};
use fs2::FileExt;
use notify::{RecursiveMode, Watcher};
use relayhub_core::prelude::*;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::prompt::OperatorPrompt;

pub const LOCK_FILE_NAME: &str = "relayhub.lock";
pub const QUIT_FILE_NAME: &str = "relayhub.quit";

/// Takeover polling: bounded retries with fixed backoff, then terminal
/// failure. No infinite retry.
pub const TAKEOVER_ATTEMPTS: u32 = 10;
pub const TAKEOVER_INTERVAL: Duration = Duration::from_millis(500);

/// Operator decision when another instance already holds the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceChoice {
    TakeOver,
    BackOff,
}

/// Outcome of startup negotiation
#[derive(Debug)]
pub enum Negotiation {
    /// This process holds the lock and proceeds as the sole instance
    Primary(LockToken),
    /// Another instance stays; this process exits cleanly
    BackOff,
}

/// Holds the exclusive lock for the process lifetime; dropping the token
/// releases it.
pub struct LockToken {
    _file: File,
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockToken").finish()
    }
}

/// One entry in the negotiation journal, retrievable over the procedure
/// registry for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEvent {
    pub at: DateTime<Local>,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct InstanceCoordinator {
    lock_path: PathBuf,
    quit_path: PathBuf,
    journal: Mutex<Vec<InstanceEvent>>,
}

impl InstanceCoordinator {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            lock_path: data_dir.join(LOCK_FILE_NAME),
            quit_path: data_dir.join(QUIT_FILE_NAME),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Attempt the exclusive claim without blocking. `None` means another
    /// process holds it.
    pub fn try_claim(&self) -> Result<Option<LockToken>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.set_len(0);
                let _ = writeln!(&file, "{}", std::process::id());
                Ok(Some(LockToken { _file: file }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the "quit" claim, requesting the current holder to vacate
    pub fn request_quit(&self) -> Result<()> {
        fs::write(&self.quit_path, format!("{}\n", std::process::id()))?;
        self.record("quit-requested", None);
        Ok(())
    }

    /// Remove a served (or stale) quit claim
    pub fn acknowledge_quit(&self) {
        let _ = fs::remove_file(&self.quit_path);
    }

    /// Run the startup protocol.
    ///
    /// Probe first; if denied, the operator chooses between backing off
    /// (clean exit) and taking over (quit claim + bounded polling). When
    /// polling exhausts, the failure is presented blocking and
    /// [`Error::LockTimeout`] is returned.
    pub async fn negotiate(&self, prompt: &dyn OperatorPrompt) -> Result<Negotiation> {
        if let Some(token) = self.try_claim()? {
            self.record("probe-acquired", None);
            return Ok(Negotiation::Primary(token));
        }
        self.record("probe-denied", None);
        info!("Another relay-hub instance holds the lock");

        match prompt.instance_choice() {
            InstanceChoice::BackOff => {
                debug!("Quitting due to existing instance");
                self.record("backed-off", None);
                Ok(Negotiation::BackOff)
            }
            InstanceChoice::TakeOver => {
                self.request_quit()?;
                for attempt in 0..=TAKEOVER_ATTEMPTS {
                    if attempt > 0 {
                        tokio::time::sleep(TAKEOVER_INTERVAL).await;
                    }
                    if let Some(token) = self.try_claim()? {
                        self.acknowledge_quit();
                        self.record("takeover-acquired", Some(format!("attempt {attempt}")));
                        info!("Took over the instance lock (attempt {attempt})");
                        return Ok(Negotiation::Primary(token));
                    }
                }
                self.record("takeover-timeout", None);
                prompt.fatal(
                    "Existing relay-hub process hung",
                    "The running instance did not honor the quit request. Find and \
                     stop the existing relayhub process, then start again.",
                );
                Err(Error::LockTimeout)
            }
        }
    }

    pub fn journal(&self) -> Vec<InstanceEvent> {
        self.journal.lock().expect("journal poisoned").clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().expect("journal poisoned").clear();
    }

    pub fn record(&self, kind: &str, detail: Option<String>) {
        self.journal
            .lock()
            .expect("journal poisoned")
            .push(InstanceEvent {
                at: Local::now(),
                kind: kind.to_string(),
                detail,
            });
    }
}

// ─────────────────────────────────────────────────────────────────
// Quit-claim watcher
// ─────────────────────────────────────────────────────────────────

/// Watches the data directory for a quit claim while this process holds
/// the lock. A claim is acknowledged (sentinel removed) and surfaced on
/// the channel as a shutdown request.
pub struct QuitWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl QuitWatcher {
    pub fn spawn(data_dir: &Path, notify_tx: UnboundedSender<()>) -> Result<Self> {
        let quit_path = data_dir.join(QUIT_FILE_NAME);

        // A claim written while we were still starting up
        if quit_path.exists() {
            let _ = fs::remove_file(&quit_path);
            let _ = notify_tx.send(());
        }

        let claim_path = quit_path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("Quit watcher error: {e}");
                    return;
                }
            };
            let is_claim = matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) && event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n == QUIT_FILE_NAME).unwrap_or(false));
            if is_claim {
                warn!("Another instance requested us to quit");
                let _ = fs::remove_file(&claim_path);
                let _ = notify_tx.send(());
            }
        })
        .map_err(|e| Error::lock(format!("failed to create quit watcher: {e}")))?;

        watcher
            .watch(data_dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::lock(format!("failed to watch {}: {e}", data_dir.display())))?;

        Ok(Self { _watcher: watcher })
    }
}
