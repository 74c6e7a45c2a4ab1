//! The resource guard: registry, reclaim source and worker bundled together.

use std::{
    sync::{Arc, Mutex, OnceLock, PoisonError},
    thread,
    time::Duration,
};

use native_guard_common::{Result, error::Error, verify_arg};

use crate::{
    config::GuardConfig,
    diagnostics::{Diagnostic, DiagnosticSink},
    handle::{Entry, Handle, ReleaseFn},
    oneshot,
    reclaim::{ReclaimItem, ReclaimQueue, ReclaimSource},
    registry::Registry,
    stats::{Counters, GuardStats},
    worker::{self, StateCell, WorkerState},
};

/// State shared between a [`ResourceGuard`], its handles and its worker thread.
pub(crate) struct GuardCore {
    registry: Registry,
    source: Box<dyn ReclaimSource>,
    sink: Arc<dyn DiagnosticSink>,
    counters: Counters,
    worker_state: StateCell,
}

impl GuardCore {
    fn new(sink: Arc<dyn DiagnosticSink>, source: Box<dyn ReclaimSource>) -> GuardCore {
        GuardCore {
            registry: Registry::new(),
            source,
            sink,
            counters: Counters::default(),
            worker_state: StateCell::new(),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn source(&self) -> &dyn ReclaimSource {
        self.source.as_ref()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn worker_state(&self) -> &StateCell {
        &self.worker_state
    }

    pub(crate) fn emit(&self, diagnostic: &Diagnostic) {
        self.sink.emit(diagnostic);
    }

    fn register(
        self: &Arc<Self>,
        address: u64,
        label: Option<String>,
        release_fn: ReleaseFn,
    ) -> Result<Handle> {
        verify_arg!(address, address != 0);

        let entry = Arc::new(Entry::new(address, label, release_fn));
        self.registry.insert(entry.clone());
        self.counters.on_registered();
        log::trace!(
            target: "native_guard",
            "registered {} for address {address}",
            entry.id()
        );
        Ok(Handle::new(entry, self.clone()))
    }

    /// Explicit release path. The callback runs on the calling thread.
    pub(crate) fn release_entry(&self, entry: &Entry) -> bool {
        if !self.registry.retire(entry) {
            return false;
        }
        self.counters.on_released();
        log::trace!(
            target: "native_guard",
            "releasing {} (address {})",
            entry.id(),
            entry.address()
        );
        entry.invoke_release();
        true
    }
}

/// Tracks native handles and releases the ones whose owners forget to.
///
/// A `ResourceGuard` owns a registry of active handles and one background reclaim
/// worker. Most code uses the process-wide instance through [`global()`](Self::global)
/// or the crate-level [`register`](crate::register) function; independent
/// instances can be created with [`new()`](Self::new), which is mainly useful in
/// tests.
///
/// Dropping a non-global guard shuts its worker down. Handles that outlive the
/// guard can still be released explicitly.
pub struct ResourceGuard {
    core: Arc<GuardCore>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ResourceGuard {
    /// Creates a guard and starts its reclaim worker.
    pub fn new(config: GuardConfig) -> Result<ResourceGuard> {
        Self::with_source(config, Box::new(ReclaimQueue::new()))
    }

    /// Creates a guard that reads reclaim notifications from a custom source.
    pub fn with_source(config: GuardConfig, source: Box<dyn ReclaimSource>) -> Result<ResourceGuard> {
        let core = Arc::new(GuardCore::new(config.sink().clone(), source));
        let worker = worker::spawn(core.clone(), config.thread_name())?;
        Ok(ResourceGuard {
            core,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Sets the configuration used when the global guard is first created.
    ///
    /// Must be called before the first call to [`global()`](Self::global);
    /// afterwards it fails with an invalid-operation error.
    pub fn configure_global(config: GuardConfig) -> Result<()> {
        let mut pending = GLOBAL_CONFIG
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if GLOBAL.get().is_some() {
            return Err(Error::invalid_operation(
                "configure_global: the global guard is already running",
            ));
        }
        *pending = Some(config);
        Ok(())
    }

    /// Returns the process-wide guard, starting it on first use.
    ///
    /// The configuration is the one passed to
    /// [`configure_global()`](Self::configure_global), or
    /// [`GuardConfig::from_env()`] otherwise.
    pub fn try_global() -> Result<&'static ResourceGuard> {
        if let Some(guard) = GLOBAL.get() {
            return Ok(guard);
        }

        let mut pending = GLOBAL_CONFIG
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(guard) = GLOBAL.get() {
            return Ok(guard);
        }

        let config = match pending.take() {
            Some(config) => config,
            None => GuardConfig::from_env()?,
        };
        let guard = ResourceGuard::new(config)?;
        Ok(GLOBAL.get_or_init(|| guard))
    }

    /// Returns the process-wide guard if it has been started.
    pub(crate) fn global_if_started() -> Option<&'static ResourceGuard> {
        GLOBAL.get()
    }

    /// Returns the process-wide guard, starting it on first use.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be started or the environment
    /// configuration is invalid. Use [`try_global()`](Self::try_global) to
    /// handle these errors.
    pub fn global() -> &'static ResourceGuard {
        Self::try_global().expect("start global native-guard")
    }

    /// Starts building a registration for `address`.
    pub fn registration(&self, address: u64) -> Registration<'_> {
        Registration {
            guard: self,
            address,
            label: None,
            release_fn: None,
        }
    }

    /// Registers `address` with its release callback.
    ///
    /// The returned [`Handle`] must be stored by the object that owns the native
    /// resource. Fails with an invalid-argument error for a null address.
    pub fn register(
        &self,
        address: u64,
        release_fn: impl Fn(u64) + Send + Sync + 'static,
    ) -> Result<Handle> {
        self.registration(address).release_with(release_fn).finish()
    }

    /// Releases `handle`, invoking its callback on the calling thread.
    ///
    /// Returns `true` if this call performed the release, `false` if the handle
    /// had already been released. The handle is always released through the
    /// guard it was registered with.
    pub fn release(&self, handle: &Handle) -> bool {
        handle.release()
    }

    /// Returns `true` if `handle` is registered with this guard and still active.
    pub fn contains(&self, handle: &Handle) -> bool {
        handle.belongs_to(&self.core) && self.core.registry.contains(handle.id())
    }

    /// Number of active handles.
    pub fn live_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn stats(&self) -> GuardStats {
        self.core.counters.snapshot()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.core.worker_state.get()
    }

    /// Blocks until every reclaim notification queued before this call has been
    /// processed.
    ///
    /// Returns `false` if the worker has stopped and the notifications will never
    /// be processed.
    pub fn flush(&self) -> bool {
        match self.enqueue_flush() {
            Some(rx) => rx.recv().is_some(),
            None => false,
        }
    }

    /// Like [`flush()`](Self::flush), but gives up after `timeout`.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        match self.enqueue_flush() {
            Some(rx) => matches!(rx.recv_timeout(timeout), Ok(Some(()))),
            None => false,
        }
    }

    /// Stops the reclaim worker and waits for it to exit.
    ///
    /// Pending reclaim notifications are dropped. Explicit release keeps working,
    /// but handles dropped without release from now on are reported and left
    /// registered. Calling this more than once is harmless; the worker cannot be
    /// restarted.
    pub fn shutdown(&self) {
        self.core.source.interrupt();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                // Called from a release callback running on the worker itself.
                return;
            }
            if worker.join().is_err() {
                log::error!(target: "native_guard", "reclaim worker terminated abnormally");
            }
        }
    }

    fn enqueue_flush(&self) -> Option<oneshot::OneshotReceiver<()>> {
        if self.worker_state() == WorkerState::Stopped || self.core.source.is_interrupted() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.core.source.enqueue(ReclaimItem::Flush(tx)).ok()?;
        Some(rx)
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("live", &self.live_count())
            .field("pending", &self.core.source.pending())
            .field("worker_state", &self.worker_state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for a single registration, created by [`ResourceGuard::registration`].
pub struct Registration<'a> {
    guard: &'a ResourceGuard,
    address: u64,
    label: Option<String>,
    release_fn: Option<ReleaseFn>,
}

impl Registration<'_> {
    /// Human-readable owner name used in diagnostics.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Uses the name of the owning type `T` as the label.
    pub fn owned_by<T: ?Sized>(self) -> Self {
        let label = short_type_name(std::any::type_name::<T>());
        self.label(label)
    }

    pub fn release_with(mut self, release_fn: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.release_fn = Some(Box::new(release_fn));
        self
    }

    /// Registers the handle.
    ///
    /// Fails with an invalid-argument error if no release callback was supplied
    /// or the address is null.
    pub fn finish(self) -> Result<Handle> {
        let Some(release_fn) = self.release_fn else {
            return Err(Error::invalid_arg(
                "release_fn",
                "a release callback is required",
            ));
        };
        self.guard.core.register(self.address, self.label, release_fn)
    }
}

/// `alloc::vec::Vec<my_crate::Buffer>` -> `Vec`, `my_crate::ffi::Buffer` -> `Buffer`.
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

static GLOBAL: OnceLock<ResourceGuard> = OnceLock::new();

/// Configuration for the global guard, consumed on first use.
static GLOBAL_CONFIG: Mutex<Option<GuardConfig>> = Mutex::new(None);
