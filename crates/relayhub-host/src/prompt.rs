//! Operator-facing prompts.
//!
//! Dialog rendering is out of scope; the host only needs three blocking
//! questions/presentations, so they sit behind a seam with a console
//! implementation and a headless auto-answer.

use std::io::{BufRead, Write};

use relayhub_core::prelude::*;

use crate::instance::InstanceChoice;

/// Blocking operator interaction points during startup
pub trait OperatorPrompt: Send + Sync {
    /// Another instance holds the lock: take over or back off?
    fn instance_choice(&self) -> InstanceChoice;

    /// Persisted state is corrupt: reset it and restart?
    fn confirm_storage_reset(&self, error: &Error) -> bool;

    /// Blocking fatal presentation before a non-zero exit
    fn fatal(&self, title: &str, message: &str);
}

/// Interactive stderr/stdin prompt for terminal operation
pub struct ConsolePrompt;

impl ConsolePrompt {
    fn read_line() -> String {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        line.trim().to_lowercase()
    }
}

impl OperatorPrompt for ConsolePrompt {
    fn instance_choice(&self) -> InstanceChoice {
        eprintln!("Another relay-hub process detected. There can only be one.");
        eprint!("[t]ake over / [b]ack off (default): ");
        let _ = std::io::stderr().flush();
        match Self::read_line().as_str() {
            "t" | "take" | "take over" | "takeover" => InstanceChoice::TakeOver,
            _ => InstanceChoice::BackOff,
        }
    }

    fn confirm_storage_reset(&self, error: &Error) -> bool {
        eprintln!("Storage error: {error}");
        eprint!("Reset all persisted state and restart? [y/N]: ");
        let _ = std::io::stderr().flush();
        matches!(Self::read_line().as_str(), "y" | "yes")
    }

    fn fatal(&self, title: &str, message: &str) {
        eprintln!();
        eprintln!("FATAL: {title}");
        eprintln!("{message}");
        eprint!("Press Enter to exit.");
        let _ = std::io::stderr().flush();
        let _ = Self::read_line();
    }
}

/// Auto-answers for headless operation: never takes over, never resets.
pub struct HeadlessPrompt;

impl OperatorPrompt for HeadlessPrompt {
    fn instance_choice(&self) -> InstanceChoice {
        info!("Headless: backing off from existing instance");
        InstanceChoice::BackOff
    }

    fn confirm_storage_reset(&self, error: &Error) -> bool {
        error!("Headless: refusing storage reset ({error})");
        false
    }

    fn fatal(&self, title: &str, message: &str) {
        error!("{title}: {message}");
    }
}
