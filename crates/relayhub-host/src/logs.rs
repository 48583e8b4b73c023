//! Process-wide log capture.
//!
//! A [`CaptureLayer`] sits in the tracing subscriber stack and sees every
//! event the process emits: it assigns a sequence number, retains the
//! record in a bounded history, writes one line to the log file
//! synchronously (the line is on disk before the logging call returns),
//! and forwards the record on the `logs` source for subscribed surfaces.
//! Callsite metadata supplies the `file:line` location token.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Local;
use relayhub_broker::EventHub;
use relayhub_core::log::{LogLevel, LogRecord};
use relayhub_core::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Base name of the rotating log file set: `relayhub.log`,
/// `relayhub.log.1` … `relayhub.log.{limit-1}`
pub const LOG_FILE_NAME: &str = "relayhub.log";

/// Bounded history size; oldest records are evicted on overflow
pub const HISTORY_CAPACITY: usize = 2000;

/// Default retention for rotated log files
pub const DEFAULT_ROTATE_LIMIT: usize = 5;

const DEFAULT_LOG_FILTER: &str =
    "relay_hub=debug,relayhub_core=debug,relayhub_broker=debug,relayhub_host=debug,info";

// ─────────────────────────────────────────────────────────────────
// LogHistory
// ─────────────────────────────────────────────────────────────────

/// Bounded recent-history ring plus the process-wide sequence counter.
///
/// Mutated only by the capture layer; read through `read_all`/`clear` by
/// the log procedures.
pub struct LogHistory {
    records: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
    seq: AtomicU64,
}

impl LogHistory {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            seq: AtomicU64::new(0),
        })
    }

    /// Allocate the next sequence number (strictly increasing, unique
    /// for the process lifetime, safe under concurrent emission).
    pub fn next_seqno(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest sequence number assigned so far
    pub fn last_seqno(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn push(&self, record: LogRecord) {
        let mut records = self.records.lock().expect("log history poisoned");
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Current bounded history, most-recent-last
    pub fn read_all(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .expect("log history poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Empty the history; the log file is untouched
    pub fn clear(&self) {
        self.records.lock().expect("log history poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("log history poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────
// CaptureLayer
// ─────────────────────────────────────────────────────────────────

thread_local! {
    // Set while a record is being forwarded on the logs source, so events
    // emitted by that delivery path are captured but not forwarded again
    // (the logs source eats its own tail otherwise).
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

/// Tracing layer implementing the capture contract.
pub struct CaptureLayer {
    history: Arc<LogHistory>,
    file: Mutex<File>,
    hub: Arc<EventHub>,
}

impl CaptureLayer {
    /// Open (truncate) the log file and build the layer. Rotation has
    /// already shifted the previous file to `.1` at this point.
    pub fn new(log_file: &Path, history: Arc<LogHistory>, hub: Arc<EventHub>) -> Result<Self> {
        let file = File::create(log_file)?;
        Ok(Self {
            history,
            file: Mutex::new(file),
            hub,
        })
    }
}

impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let meta = event.metadata();
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));

        let location = match (meta.file(), meta.line()) {
            (Some(file), Some(line)) => {
                let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
                format!("{base}:{line}")
            }
            _ => meta.target().to_string(),
        };

        let record = LogRecord {
            seqno: self.history.next_seqno(),
            date: Local::now(),
            level: (*meta.level()).into(),
            message,
            location,
        };

        // Synchronous write: the line is on disk before the caller returns.
        {
            let mut file = self.file.lock().expect("log file poisoned");
            let _ = writeln!(file, "{}", record.render_line());
            let _ = file.flush();
        }
        self.history.push(record.clone());

        let nested = FORWARDING.with(|flag| flag.replace(true));
        if !nested {
            if let Ok(payload) = serde_json::to_value(&record) {
                self.hub.emit("message", &payload);
            }
        }
        FORWARDING.with(|flag| flag.set(nested));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.0, "{value:?}");
        }
    }
}

/// Install the capture layer as the global subscriber.
///
/// Log level is controlled by the `RELAYHUB_LOG` environment variable,
/// falling back to `filter` from config, then to the built-in default.
pub fn init(log_file: &Path, hub: Arc<EventHub>, filter: Option<&str>) -> Result<Arc<LogHistory>> {
    let history = LogHistory::new(HISTORY_CAPACITY);
    let layer = CaptureLayer::new(log_file, history.clone(), hub)?;
    let env_filter = EnvFilter::try_from_env("RELAYHUB_LOG")
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();

    Ok(history)
}

// ─────────────────────────────────────────────────────────────────
// Rotation
// ─────────────────────────────────────────────────────────────────

/// Rotate the numbered log file set. Runs once at startup, before the
/// capture layer truncates the unsuffixed file.
///
/// Files are ordered newest-first by name; anything beyond `limit` is
/// deleted (only happens when the limit was lowered between runs), then
/// the newest `limit - 1` files shift suffixes so the most recent
/// unsuffixed file becomes `.1`. In steady state the shift itself drops
/// the oldest file by renaming over it.
pub fn rotate_log_files(dir: &Path, limit: usize) -> Result<()> {
    let mut logs: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(LOG_FILE_NAME))
        .collect();
    logs.sort_by(|a, b| b.cmp(a));

    while logs.len() > limit {
        let oldest = logs.remove(0);
        fs::remove_file(dir.join(&oldest))?;
    }

    let keep = logs.len().min(limit.saturating_sub(1));
    let mut suffix = keep;
    let start = logs.len() - keep;
    for name in &logs[start..] {
        let target = format!("{LOG_FILE_NAME}.{suffix}");
        suffix -= 1;
        if *name == target {
            continue;
        }
        let target_path = dir.join(&target);
        if target_path.exists() {
            fs::remove_file(&target_path)?;
        }
        fs::rename(dir.join(name), target_path)?;
    }
    Ok(())
}
