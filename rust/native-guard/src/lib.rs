//! Exactly-once release of native resources, with a background safety net for
//! owners that forget to release.
//!
//! Code that wraps a foreign resource (memory, file descriptors, library objects)
//! registers the resource's address together with a release callback and stores
//! the returned [`Handle`] inside the wrapper. From then on there are two ways the
//! callback can run, and it runs through exactly one of them:
//!
//! 1. **Explicit release**: the wrapper calls [`Handle::release`] (or
//!    [`release`]) when it is closed. The callback runs synchronously on the
//!    caller's thread.
//! 2. **Reclamation**: the wrapper is dropped without releasing. The handle
//!    reports itself to the guard's reclaim source, and the background reclaim
//!    worker logs a "not properly closed" diagnostic and runs the callback on the
//!    owner's behalf.
//!
//! # Key Components
//!
//! - [`Handle`] - owner-bound token for one registered address
//! - [`ResourceGuard`] - registry of active handles plus the reclaim worker; a
//!   process-wide instance is available via [`ResourceGuard::global`]
//! - [`reclaim::ReclaimSource`] - queue of "owner went away" notifications
//! - [`diagnostics::DiagnosticSink`] - where leak and reclaim messages go
//!   (the `log` facade by default)
//!
//! # Architecture
//!
//! ```text
//!  wrapper thread(s)                          reclaim worker thread
//!  ─────────────────                          ─────────────────────
//!  register() ──► Registry.insert
//!  release()  ──► CAS Active→Released ─┐
//!                 Registry.remove      │
//!                 callback(address)    │ single winner
//!  drop(Handle) ─► ReclaimSource ──────┼──► next() ──► CAS Active→Released
//!                                      │              Registry.remove
//!                                      └────────────  callback(address)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! struct NativeBuffer {
//!     handle: native_guard::Handle,
//! }
//!
//! impl NativeBuffer {
//!     fn new() -> native_guard_common::Result<NativeBuffer> {
//!         let ptr = unsafe { ffi::buffer_new() };
//!         let handle = native_guard::register(ptr as u64, |addr| unsafe {
//!             ffi::buffer_free(addr as *mut ffi::Buffer)
//!         }, Some("NativeBuffer"))?;
//!         Ok(NativeBuffer { handle })
//!     }
//!
//!     fn close(&self) {
//!         native_guard::release(&self.handle);
//!     }
//! }
//! ```

pub mod config;
pub mod diagnostics;
pub mod guard;
pub mod handle;
mod oneshot;
pub mod reclaim;
mod registry;
pub mod stats;
pub mod worker;

use native_guard_common::Result;

pub use config::GuardConfig;
pub use diagnostics::{Diagnostic, DiagnosticSink, DiagnosticsMode};
pub use guard::{Registration, ResourceGuard};
pub use handle::{Handle, HandleId, HandleState, ReleaseFn};
pub use stats::GuardStats;
pub use worker::WorkerState;

/// Registers `address` with the process-wide guard.
///
/// `label` names the owning type in diagnostics. Fails with an invalid-argument
/// error for a null address, or if the global guard cannot be started.
pub fn register(
    address: u64,
    release_fn: impl Fn(u64) + Send + Sync + 'static,
    label: Option<&str>,
) -> Result<Handle> {
    let guard = ResourceGuard::try_global()?;
    let registration = guard.registration(address).release_with(release_fn);
    match label {
        Some(label) => registration.label(label).finish(),
        None => registration.finish(),
    }
}

/// Releases `handle` on the calling thread. Idempotent: returns `false` if the
/// handle was already released.
pub fn release(handle: &Handle) -> bool {
    handle.release()
}

/// Returns `true` while `handle` is registered with the process-wide guard and
/// not yet released. Intended for tests and diagnostics; it never starts the
/// global guard.
pub fn contains(handle: &Handle) -> bool {
    ResourceGuard::global_if_started().is_some_and(|guard| guard.contains(handle))
}
