//! Diagnostic messages emitted by the guard and the sinks that receive them.
//!
//! The message texts are fixed; tooling that scrapes output for leaked resources
//! relies on them:
//!
//! - `"<address> not properly closed, doing it now"`
//! - `"<label> destroyed <address>"` or `"Destroyed <address>"`
//! - `"Thread Interrupted"`

use std::{
    fmt,
    io::{self, Write},
    str::FromStr,
    sync::Arc,
};

use native_guard_common::{Result, error::Error};

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A handle reached the reclaim worker without an explicit release.
    NotProperlyClosed { address: u64 },
    /// The reclaim worker invoked the release callback.
    Destroyed { label: Option<String>, address: u64 },
    /// The reclaim worker stopped.
    Interrupted,
    /// The release callback panicked on the reclaim worker.
    ReleaseFailed { address: u64, message: String },
    /// A handle was dropped without release after the reclaim worker stopped.
    LeakedAfterStop { address: u64 },
}

impl Diagnostic {
    /// Severity used when the diagnostic is routed to the `log` facade.
    pub fn level(&self) -> log::Level {
        match self {
            Diagnostic::NotProperlyClosed { .. } => log::Level::Warn,
            Diagnostic::Destroyed { .. } => log::Level::Debug,
            Diagnostic::Interrupted => log::Level::Info,
            Diagnostic::ReleaseFailed { .. } => log::Level::Error,
            Diagnostic::LeakedAfterStop { .. } => log::Level::Warn,
        }
    }

    pub fn address(&self) -> Option<u64> {
        match self {
            Diagnostic::NotProperlyClosed { address }
            | Diagnostic::Destroyed { address, .. }
            | Diagnostic::ReleaseFailed { address, .. }
            | Diagnostic::LeakedAfterStop { address } => Some(*address),
            Diagnostic::Interrupted => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NotProperlyClosed { address } => {
                write!(f, "{address} not properly closed, doing it now")
            }
            Diagnostic::Destroyed {
                label: Some(label),
                address,
            } => write!(f, "{label} destroyed {address}"),
            Diagnostic::Destroyed {
                label: None,
                address,
            } => write!(f, "Destroyed {address}"),
            Diagnostic::Interrupted => write!(f, "Thread Interrupted"),
            Diagnostic::ReleaseFailed { address, message } => {
                write!(f, "release of {address} failed: {message}")
            }
            Diagnostic::LeakedAfterStop { address } => {
                write!(f, "{address} leaked after reclaim worker stopped")
            }
        }
    }
}

/// Receiver of diagnostic events. Called from application threads and from the
/// reclaim worker thread.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Routes diagnostics to the `log` facade under the `native_guard` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        log::log!(target: "native_guard", diagnostic.level(), "{diagnostic}");
    }
}

/// Prints each diagnostic as one line on standard output. Write errors (a
/// closed pipe, for instance) are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        let _ = writeln!(io::stdout().lock(), "{diagnostic}");
    }
}

/// Discards every diagnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _diagnostic: &Diagnostic) {}
}

/// Named choice of one of the built-in sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticsMode {
    #[default]
    Log,
    Stdout,
    Off,
}

impl DiagnosticsMode {
    pub fn into_sink(self) -> Arc<dyn DiagnosticSink> {
        match self {
            DiagnosticsMode::Log => Arc::new(LogSink),
            DiagnosticsMode::Stdout => Arc::new(StdoutSink),
            DiagnosticsMode::Off => Arc::new(NullSink),
        }
    }
}

impl FromStr for DiagnosticsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(DiagnosticsMode::Log),
            "stdout" => Ok(DiagnosticsMode::Stdout),
            "off" | "none" => Ok(DiagnosticsMode::Off),
            other => Err(Error::invalid_arg(
                "diagnostics",
                format!("unknown diagnostics mode '{other}', expected log, stdout or off"),
            )),
        }
    }
}
