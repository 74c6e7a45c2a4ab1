use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of a guard's counters.
///
/// **Note**: The counters are updated independently, so a snapshot taken while
/// other threads are active may be slightly inconsistent. It is intended for
/// diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    /// Handles registered.
    pub registered: u64,
    /// Handles released explicitly by their owner.
    pub released: u64,
    /// Handles released by the reclaim worker after their owner dropped them.
    pub reclaimed: u64,
    /// Reclaim notifications for handles that were already released.
    pub discarded: u64,
    /// Release callbacks that panicked on the reclaim worker.
    pub release_failures: u64,
}

impl GuardStats {
    /// Handles that have been released through either path.
    pub fn total_released(&self) -> u64 {
        self.released + self.reclaimed + self.release_failures
    }

    /// Handles still awaiting release (diagnostic estimate).
    pub fn outstanding(&self) -> u64 {
        self.registered.saturating_sub(self.total_released())
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    registered: AtomicU64,
    released: AtomicU64,
    reclaimed: AtomicU64,
    discarded: AtomicU64,
    release_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn on_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> GuardStats {
        GuardStats {
            registered: self.registered.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_outstanding() {
        let counters = Counters::default();
        for _ in 0..5 {
            counters.on_registered();
        }
        counters.on_released();
        counters.on_reclaimed();
        counters.on_release_failure();
        counters.on_discarded();

        let stats = counters.snapshot();
        assert_eq!(stats.registered, 5);
        assert_eq!(stats.total_released(), 3);
        assert_eq!(stats.outstanding(), 2);
        assert_eq!(stats.discarded, 1);
    }
}
