//! Coalesced host metrics polling.
//!
//! Sampling host metrics is comparatively expensive, so concurrent callers
//! of [`MetricsCoalescer::poll`] share one in-flight fetch and at most one
//! underlying sample runs per minimum interval. After a wave of callers is
//! satisfied, one follow-up fetch is scheduled in anticipation of the next
//! caller; it clears itself once it completes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};
use tokio::time::Instant;

/// Minimum interval between two underlying samples
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetrics {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    pub load_average: f64,
    pub uptime_secs: u64,
}

/// One sample of host metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Local>,
    pub process: ProcessMetrics,
    pub system: SystemMetrics,
}

/// The underlying measurement; swapped for a counting fake in tests.
pub trait MetricsProvider: Send + Sync + 'static {
    fn sample(&self) -> MetricsSnapshot;
}

/// Default provider over sysinfo: current-process cpu/mem plus system
/// memory, load and uptime.
pub struct SystemMetricsProvider {
    system: Mutex<System>,
}

impl SystemMetricsProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMetricsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SystemMetricsProvider {
    fn sample(&self) -> MetricsSnapshot {
        let mut system = self.system.lock().expect("system handle poisoned");
        system.refresh_memory();

        let process = match sysinfo::get_current_pid() {
            Ok(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system
                    .process(pid)
                    .map(|process| ProcessMetrics {
                        cpu_percent: process.cpu_usage(),
                        memory_bytes: process.memory(),
                    })
                    .unwrap_or(ProcessMetrics {
                        cpu_percent: 0.0,
                        memory_bytes: 0,
                    })
            }
            Err(_) => ProcessMetrics {
                cpu_percent: 0.0,
                memory_bytes: 0,
            },
        };

        MetricsSnapshot {
            taken_at: Local::now(),
            process,
            system: SystemMetrics {
                total_memory_bytes: system.total_memory(),
                used_memory_bytes: system.used_memory(),
                load_average: System::load_average().one,
                uptime_secs: System::uptime(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Coalescer
// ─────────────────────────────────────────────────────────────────

type SharedSample = Shared<BoxFuture<'static, MetricsSnapshot>>;

#[derive(Default)]
struct FetchState {
    pending: Option<SharedSample>,
    last_fetch: Option<Instant>,
}

/// Serializes concurrent pollers into one in-flight sample per interval.
pub struct MetricsCoalescer<P: MetricsProvider> {
    provider: Arc<P>,
    interval: Duration,
    state: Arc<Mutex<FetchState>>,
}

impl<P: MetricsProvider> MetricsCoalescer<P> {
    pub fn new(provider: P, interval: Duration) -> Self {
        Self {
            provider: Arc::new(provider),
            interval,
            state: Arc::new(Mutex::new(FetchState::default())),
        }
    }

    /// Return the pending sample, creating one if none is in flight.
    /// All callers arriving within the interval share the same result.
    pub async fn poll(&self) -> MetricsSnapshot {
        let fetch = {
            let mut state = self.state.lock().expect("fetch state poisoned");
            match &state.pending {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = schedule_fetch(
                        self.provider.clone(),
                        self.state.clone(),
                        self.interval,
                        false,
                    );
                    state.pending = Some(fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }
}

/// Build one fetch: wait out the remainder of the interval, then sample.
///
/// A non-reentrant fetch installs its own follow-up before sampling; the
/// follow-up (reentrant) clears the pending slot instead, so the chain
/// stops once nobody is polling.
fn schedule_fetch<P: MetricsProvider>(
    provider: Arc<P>,
    state: Arc<Mutex<FetchState>>,
    interval: Duration,
    reentrant: bool,
) -> SharedSample {
    let fut = async move {
        let wait = {
            let state = state.lock().expect("fetch state poisoned");
            state
                .last_fetch
                .map(|at| interval.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        {
            let mut guard = state.lock().expect("fetch state poisoned");
            guard.pending = if reentrant {
                None
            } else {
                Some(schedule_fetch(
                    provider.clone(),
                    state.clone(),
                    interval,
                    true,
                ))
            };
            guard.last_fetch = Some(Instant::now());
        }
        provider.sample()
    };
    fut.boxed().shared()
}
