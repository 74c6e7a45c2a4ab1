//! The reclaim worker.
//!
//! One background thread per guard. It blocks on the guard's
//! [`ReclaimSource`](crate::reclaim::ReclaimSource) and, for every handle whose
//! owner dropped it without releasing, performs the release on the owner's
//! behalf.
//!
//! ```text
//!            ┌──────────── item processed ────────────┐
//!            ▼                                        │
//!       ┌─────────┐   next() -> item   ┌────────────┐ │
//!  ───► │ Waiting │ ─────────────────► │ Processing │─┘
//!       └─────────┘                    └────────────┘
//!            │ next() -> Interrupted
//!            ▼
//!       ┌─────────┐
//!       │ Stopped │  (terminal; logs "Thread Interrupted")
//!       └─────────┘
//! ```
//!
//! A panic while handling an item, from the release callback or from the
//! diagnostic sink, is contained to that item; the worker reports it and keeps
//! running.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread,
};

use native_guard_common::{Result, error::Error};

use crate::{
    diagnostics::Diagnostic,
    guard::GuardCore,
    handle::HandleId,
    reclaim::ReclaimItem,
};

/// Observable state of the reclaim worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Blocked on the reclaim source.
    Waiting = 0,
    /// Handling one reclaim item.
    Processing = 1,
    /// Exited after interruption. Automatic reclamation has ceased.
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> WorkerState {
        match value {
            0 => WorkerState::Waiting,
            1 => WorkerState::Processing,
            _ => WorkerState::Stopped,
        }
    }
}

/// Atomic cell holding the current [`WorkerState`].
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> StateCell {
        StateCell(AtomicU8::new(WorkerState::Waiting as u8))
    }

    pub(crate) fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Starts the reclaim worker thread for `core`.
pub(crate) fn spawn(core: Arc<GuardCore>, thread_name: &str) -> Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new();
    if !thread_name.is_empty() {
        builder = builder.name(thread_name.to_string());
    }
    builder
        .spawn(move || run(&core))
        .map_err(|e| Error::io("spawn reclaim worker", e))
}

/// Worker loop. Returns once the source is interrupted.
pub(crate) fn run(core: &GuardCore) {
    let _exit = StopOnExit(core);
    log::debug!(target: "native_guard", "reclaim worker started");
    loop {
        core.worker_state().set(WorkerState::Waiting);
        let item = match core.source().next() {
            Ok(item) => item,
            Err(_) => break,
        };

        core.worker_state().set(WorkerState::Processing);
        // A panicking sink must not take the worker down with it.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| process(core, item))) {
            log::error!(
                target: "native_guard",
                "reclaim item aborted: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

/// Puts the worker into `Stopped` however `run` exits.
///
/// On an abnormal exit the source is interrupted as well, so later leaks are
/// reported instead of queued for a worker that no longer exists.
struct StopOnExit<'a>(&'a GuardCore);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        let core = self.0;
        core.source().interrupt();
        let _ = panic::catch_unwind(AssertUnwindSafe(|| core.emit(&Diagnostic::Interrupted)));
        core.worker_state().set(WorkerState::Stopped);
    }
}

fn process(core: &GuardCore, item: ReclaimItem) {
    match item {
        ReclaimItem::Reclaim(id) => reclaim(core, id),
        ReclaimItem::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}

fn reclaim(core: &GuardCore, id: HandleId) {
    let Some(entry) = core.registry().take_active(id) else {
        // Released explicitly before the owner dropped the handle.
        core.counters().on_discarded();
        log::trace!(target: "native_guard", "reclaim of {id} discarded, already released");
        return;
    };

    let address = entry.address();
    core.emit(&Diagnostic::NotProperlyClosed { address });

    match panic::catch_unwind(AssertUnwindSafe(|| entry.invoke_release())) {
        Ok(()) => {
            core.counters().on_reclaimed();
            core.emit(&Diagnostic::Destroyed {
                label: entry.label().map(str::to_string),
                address,
            });
        }
        Err(payload) => {
            core.counters().on_release_failure();
            core.emit(&Diagnostic::ReleaseFailed {
                address,
                message: panic_message(payload.as_ref()),
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "release callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_roundtrip() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), WorkerState::Waiting);
        cell.set(WorkerState::Processing);
        assert_eq!(cell.get(), WorkerState::Processing);
        cell.set(WorkerState::Stopped);
        assert_eq!(cell.get(), WorkerState::Stopped);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("native free failed")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "native free failed");

        let payload = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");

        let payload = panic::catch_unwind(|| std::panic::panic_any(5u32)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "release callback panicked");
    }
}
