//! The set of active handles.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::handle::{Entry, HandleId};

/// Concurrency-safe collection of active handle entries, keyed by identity.
///
/// Every operation takes the single internal lock, which makes add, remove and
/// membership queries linearizable. Release callbacks are never run while the
/// lock is held.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<HandleId, Arc<Entry>>>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry::default()
    }

    pub(crate) fn insert(&self, entry: Arc<Entry>) {
        let prev = self.lock().insert(entry.id(), entry);
        debug_assert!(prev.is_none(), "handle ids are unique");
    }

    pub(crate) fn contains(&self, id: HandleId) -> bool {
        self.lock().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Marks `entry` released and removes it from the registry as one step.
    ///
    /// Returns `false` if the entry was already released, in which case nothing
    /// changes.
    pub(crate) fn retire(&self, entry: &Entry) -> bool {
        let mut entries = self.lock();
        if !entry.try_mark_released() {
            return false;
        }
        entries.remove(&entry.id());
        true
    }

    /// Looks up `id` and, if the entry is still active, retires it and hands it
    /// back to the caller, who becomes responsible for invoking its callback.
    pub(crate) fn take_active(&self, id: HandleId) -> Option<Arc<Entry>> {
        let mut entries = self.lock();
        let entry = entries.get(&id)?;
        if !entry.try_mark_released() {
            return None;
        }
        entries.remove(&id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HandleId, Arc<Entry>>> {
        // Callbacks never run under this lock, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
