//! Tracked native handles.
//!
//! A [`Handle`] pairs an opaque native address with the callback that frees it.
//! The wrapper type that owns the native resource stores its `Handle` as a field;
//! the handle therefore lives exactly as long as its owner. Dropping a handle that
//! was never released hands it over to the reclaim worker.
//!
//! ## Lifecycle
//!
//! 1. **Active**: Created by registration, present in the registry
//! 2. **Released**: The release callback has been claimed by exactly one path,
//!    either an explicit [`Handle::release`] or automatic reclamation
//!
//! There is no transition back from `Released`.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use crate::{
    diagnostics::Diagnostic,
    guard::GuardCore,
    reclaim::ReclaimItem,
};

/// Callback that frees the native resource behind an address.
///
/// The callback may run on the reclaim worker thread rather than the thread that
/// registered it.
pub type ReleaseFn = Box<dyn Fn(u64) + Send + Sync>;

/// Process-unique identity of a registered handle.
///
/// Two registrations of the same address produce distinct ids and are tracked
/// independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> HandleId {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        HandleId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    Active = 0,
    Released = 1,
}

impl HandleState {
    fn from_u8(value: u8) -> HandleState {
        match value {
            0 => HandleState::Active,
            _ => HandleState::Released,
        }
    }
}

/// Shared bookkeeping for one registration.
///
/// The registry holds an `Arc<Entry>` so the entry outlives the owner's
/// [`Handle`]. The entry has no link back to the owner.
pub(crate) struct Entry {
    id: HandleId,
    address: u64,
    label: Option<String>,
    state: AtomicU8,
    release_fn: ReleaseFn,
}

impl Entry {
    pub(crate) fn new(address: u64, label: Option<String>, release_fn: ReleaseFn) -> Entry {
        Entry {
            id: HandleId::next(),
            address,
            label,
            state: AtomicU8::new(HandleState::Active as u8),
            release_fn,
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn address(&self) -> u64 {
        self.address
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Performs the one-way `Active -> Released` transition.
    ///
    /// Returns `true` only for the single caller that won the transition; that
    /// caller is the one allowed to invoke the release callback.
    pub(crate) fn try_mark_released(&self) -> bool {
        self.state
            .compare_exchange(
                HandleState::Active as u8,
                HandleState::Released as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Runs the release callback. Must only be called by the winner of
    /// [`try_mark_released`](Self::try_mark_released).
    pub(crate) fn invoke_release(&self) {
        debug_assert_eq!(self.state(), HandleState::Released);
        (self.release_fn)(self.address);
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

/// Owner-bound token for a registered native resource.
///
/// `Handle` is deliberately not `Clone`: it is meant to be stored in exactly one
/// owning wrapper. Dropping it while still active is treated as a leak: the
/// handle is queued for the reclaim worker, which releases the resource on the
/// owner's behalf.
///
/// ```ignore
/// struct NativeBuffer {
///     handle: native_guard::Handle,
/// }
///
/// impl NativeBuffer {
///     fn close(&self) {
///         self.handle.release();
///     }
/// }
/// ```
pub struct Handle {
    entry: Arc<Entry>,
    core: Arc<GuardCore>,
}

impl Handle {
    pub(crate) fn new(entry: Arc<Entry>, core: Arc<GuardCore>) -> Handle {
        Handle { entry, core }
    }

    pub fn id(&self) -> HandleId {
        self.entry.id()
    }

    pub fn address(&self) -> u64 {
        self.entry.address()
    }

    pub fn label(&self) -> Option<&str> {
        self.entry.label()
    }

    pub fn state(&self) -> HandleState {
        self.entry.state()
    }

    pub fn is_released(&self) -> bool {
        self.state() == HandleState::Released
    }

    /// Releases the native resource on the calling thread.
    ///
    /// The first call invokes the release callback and returns `true`. Any
    /// further call is a no-op returning `false`. A panic raised by the callback
    /// propagates to the caller; the handle stays released.
    pub fn release(&self) -> bool {
        self.core.release_entry(&self.entry)
    }

    pub(crate) fn belongs_to(&self, core: &Arc<GuardCore>) -> bool {
        Arc::ptr_eq(&self.core, core)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.entry.state() == HandleState::Released {
            return;
        }

        let id = self.entry.id();
        if self.core.source().enqueue(ReclaimItem::Reclaim(id)).is_err() {
            // Reclaim worker is gone; the resource stays in the registry.
            self.core.emit(&Diagnostic::LeakedAfterStop {
                address: self.entry.address(),
            });
            return;
        }
        log::trace!(target: "native_guard", "handle {id} dropped without release, queued for reclaim");
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id())
            .field("address", &self.address())
            .field("label", &self.label())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_entry(address: u64) -> (Entry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let entry = Entry::new(
            address,
            Some("Buffer".to_string()),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (entry, calls)
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_entry_starts_active() {
        let (entry, calls) = counting_entry(0x10);
        assert_eq!(entry.state(), HandleState::Active);
        assert_eq!(entry.address(), 0x10);
        assert_eq!(entry.label(), Some("Buffer"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mark_released_only_once() {
        let (entry, _) = counting_entry(0x10);
        assert!(entry.try_mark_released());
        assert!(!entry.try_mark_released());
        assert_eq!(entry.state(), HandleState::Released);
    }

    #[test]
    fn test_mark_released_single_winner_across_threads() {
        let (entry, calls) = counting_entry(0x20);
        let entry = Arc::new(entry);

        std::thread::scope(|s| {
            for _ in 0..8 {
                let entry = entry.clone();
                s.spawn(move || {
                    if entry.try_mark_released() {
                        entry.invoke_release();
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

}
