//! Guard configuration.

use std::sync::Arc;

use native_guard_common::Result;

use crate::diagnostics::{DiagnosticSink, DiagnosticsMode};

/// Name given to the reclaim worker thread unless configured otherwise.
pub const DEFAULT_THREAD_NAME: &str = "native-guard-reclaim";

/// Environment variable consulted by [`GuardConfig::from_env`].
///
/// Accepted values: `log`, `stdout`, `off`.
pub const DIAGNOSTICS_ENV_VAR: &str = "NATIVE_GUARD_DIAGNOSTICS";

/// Settings for a [`ResourceGuard`](crate::ResourceGuard).
#[derive(Clone)]
pub struct GuardConfig {
    thread_name: String,
    sink: Arc<dyn DiagnosticSink>,
}

impl GuardConfig {
    pub fn new() -> GuardConfig {
        GuardConfig {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            sink: DiagnosticsMode::default().into_sink(),
        }
    }

    /// Builds the default configuration, honoring [`DIAGNOSTICS_ENV_VAR`].
    ///
    /// An unset variable selects the `log` sink; an unrecognized value is an
    /// invalid argument.
    pub fn from_env() -> Result<GuardConfig> {
        let config = GuardConfig::new();
        match std::env::var(DIAGNOSTICS_ENV_VAR) {
            Ok(value) => Ok(config.with_diagnostics(value.parse()?)),
            Err(_) => Ok(config),
        }
    }

    /// Sets the reclaim worker thread name. An empty name leaves the thread
    /// unnamed.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_diagnostics(self, mode: DiagnosticsMode) -> Self {
        self.with_sink(mode.into_sink())
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardConfig")
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.thread_name(), DEFAULT_THREAD_NAME);
    }

    #[test]
    fn test_builder_setters() {
        let config = GuardConfig::new()
            .with_thread_name("leak-reaper")
            .with_diagnostics(DiagnosticsMode::Off);
        assert_eq!(config.thread_name(), "leak-reaper");
        assert!(format!("{config:?}").contains("leak-reaper"));
    }
}
