//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Broker Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Unknown event source: {key}")]
    UnknownSource { key: String },

    #[error("Surface send failed: {message}")]
    SurfaceSend { message: String },

    // ─────────────────────────────────────────────────────────────
    // Storage/Settings Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage file is corrupt: {path}")]
    StorageCorrupt { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Single-Instance Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Existing instance did not release the lock in time")]
    LockTimeout,

    #[error("Lock error: {message}")]
    Lock { message: String },

    // ─────────────────────────────────────────────────────────────
    // Procedure Registry Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Duplicate procedure registration: {name}")]
    DuplicateProcedure { name: String },

    #[error("Unknown procedure: {name}")]
    UnknownProcedure { name: String },

    #[error("Bad procedure arguments: {message}")]
    ProcedureArgs { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn unknown_source(key: impl Into<String>) -> Self {
        Self::UnknownSource { key: key.into() }
    }

    pub fn surface_send(message: impl Into<String>) -> Self {
        Self::SurfaceSend {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn storage_corrupt(path: impl Into<PathBuf>) -> Self {
        Self::StorageCorrupt { path: path.into() }
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    pub fn duplicate_procedure(name: impl Into<String>) -> Self {
        Self::DuplicateProcedure { name: name.into() }
    }

    pub fn unknown_procedure(name: impl Into<String>) -> Self {
        Self::UnknownProcedure { name: name.into() }
    }

    pub fn procedure_args(message: impl Into<String>) -> Self {
        Self::ProcedureArgs {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownSource { .. }
                | Error::SurfaceSend { .. }
                | Error::UnknownProcedure { .. }
                | Error::ProcedureArgs { .. }
                | Error::ChannelSend { .. }
        )
    }

    /// Check if this error should trigger host exit with a non-zero status
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout | Error::Storage { .. } | Error::StorageCorrupt { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
