//! # relayhub-core - Core Domain Types
//!
//! Foundation crate for relay-hub. Provides the error taxonomy, the log
//! record model, and the event payload types that cross the broker.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Log Records (`log`)
//! - [`LogRecord`] - A captured log line with sequence number, level,
//!   message, and source-location token
//! - [`LogLevel`] - Log severity (Debug, Info, Warn, Error)
//!
//! ### Events (`events`)
//! - [`SettingChange`] - Emitted on the `app` source when a setting mutates
//! - [`ConnectionStatus`] / [`ConnectionState`] - Game-connection status
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use relayhub_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod log;

/// Prelude for common imports used throughout all relay-hub crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{ConnectionState, ConnectionStatus, SettingChange};
pub use log::{LogLevel, LogRecord};
