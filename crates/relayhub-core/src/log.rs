//! Log record model shared by the capture layer and the `logs` source.

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Uppercase label used in the log file
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            LogLevel::Error
        } else if level == tracing::Level::WARN {
            LogLevel::Warn
        } else if level == tracing::Level::INFO {
            LogLevel::Info
        } else {
            LogLevel::Debug
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single captured log record.
///
/// Sequence numbers are process-lifetime-unique and strictly increasing in
/// emission order; assignment is a single atomic counter increment in the
/// capture layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub seqno: u64,
    pub date: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
    /// Source-location token, e.g. `capture.rs:42`. Derived from tracing
    /// callsite metadata; falls back to the event target.
    pub location: String,
}

impl LogRecord {
    /// Render the single-line file format: `H:MM:SS.mmm [LEVEL] (loc): msg`
    pub fn render_line(&self) -> String {
        let t = self.date.time();
        format!(
            "{}:{:02}:{:02}.{:03} {:>7} ({}): {}",
            t.hour(),
            t.minute(),
            t.second(),
            self.date.timestamp_subsec_millis(),
            format!("[{}]", self.level.label()),
            self.location,
            self.message
        )
    }
}
