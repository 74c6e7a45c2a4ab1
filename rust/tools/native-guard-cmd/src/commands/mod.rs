//! Command implementations for native-guard-cmd

use native_guard::{DiagnosticsMode, GuardConfig, ResourceGuard};

pub mod demo;
pub mod simulate;

/// Creates a guard configured from the environment. `--stdout` overrides the
/// diagnostics sink chosen there.
pub fn create_guard(stdout: bool) -> anyhow::Result<ResourceGuard> {
    let config = guard_config(GuardConfig::from_env()?, stdout);
    let guard = ResourceGuard::new(config)?;
    Ok(guard)
}

fn guard_config(config: GuardConfig, stdout: bool) -> GuardConfig {
    if stdout {
        config.with_diagnostics(DiagnosticsMode::Stdout)
    } else {
        config
    }
}
