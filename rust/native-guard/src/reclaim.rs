//! The source of "owner went away" notifications.
//!
//! A [`Handle`](crate::Handle) that is dropped while still active pushes its id
//! onto a [`ReclaimSource`]. The reclaim worker is the only consumer: it blocks on
//! [`ReclaimSource::next`] and releases each reported handle on the owner's behalf.
//!
//! The source delivers items strictly in FIFO order. Once interrupted it stops
//! delivering, even if items are still queued; those items are dropped and never
//! processed.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::handle::HandleId;

pub use crate::oneshot::OneshotSender;

/// A unit of work for the reclaim worker.
#[derive(Debug)]
pub enum ReclaimItem {
    /// The owner of this handle dropped it without releasing it.
    Reclaim(HandleId),
    /// Acknowledge once every item queued ahead of this one has been processed.
    Flush(OneshotSender<()>),
}

/// Returned by [`ReclaimSource::next`] once the source has been interrupted.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Interrupted;

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reclaim source interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Blocking queue of reclaim notifications.
pub trait ReclaimSource: Send + Sync {
    /// Adds an item. Returns the item back if the source has been interrupted.
    fn enqueue(&self, item: ReclaimItem) -> Result<(), ReclaimItem>;

    /// Blocks without timeout until an item is available or the source is
    /// interrupted.
    fn next(&self) -> Result<ReclaimItem, Interrupted>;

    /// Wakes the consumer and makes every subsequent `next` fail with
    /// [`Interrupted`]. Pending items are discarded.
    fn interrupt(&self);

    fn is_interrupted(&self) -> bool;

    /// Number of queued items (diagnostic only, stale by the time it is read).
    fn pending(&self) -> usize;
}

/// Unbounded FIFO [`ReclaimSource`] built on a mutex and a condition variable.
pub struct ReclaimQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

struct QueueState {
    items: VecDeque<ReclaimItem>,
    interrupted: bool,
}

impl ReclaimQueue {
    pub fn new() -> ReclaimQueue {
        ReclaimQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                interrupted: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReclaimQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReclaimSource for ReclaimQueue {
    fn enqueue(&self, item: ReclaimItem) -> Result<(), ReclaimItem> {
        let mut state = self.lock();
        if state.interrupted {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    fn next(&self) -> Result<ReclaimItem, Interrupted> {
        let mut state = self.lock();
        loop {
            if state.interrupted {
                return Err(Interrupted);
            }
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn interrupt(&self) {
        let discarded = {
            let mut state = self.lock();
            state.interrupted = true;
            std::mem::take(&mut state.items)
        };
        self.not_empty.notify_all();
        if !discarded.is_empty() {
            log::debug!(
                target: "native_guard",
                "reclaim source interrupted with {} pending item(s)",
                discarded.len()
            );
        }
        // Dropping outside the lock closes any pending flush acknowledgements.
        drop(discarded);
    }

    fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    fn pending(&self) -> usize {
        self.lock().items.len()
    }
}

impl std::fmt::Debug for ReclaimQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ReclaimQueue")
            .field("pending", &state.items.len())
            .field("interrupted", &state.interrupted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    fn reclaim_id(item: ReclaimItem) -> HandleId {
        match item {
            ReclaimItem::Reclaim(id) => id,
            ReclaimItem::Flush(_) => panic!("expected a reclaim item"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = ReclaimQueue::new();
        let ids: Vec<_> = (0..5).map(|_| HandleId::next()).collect();
        for &id in &ids {
            queue.enqueue(ReclaimItem::Reclaim(id)).unwrap();
        }
        assert_eq!(queue.pending(), 5);
        for &id in &ids {
            assert_eq!(reclaim_id(queue.next().unwrap()), id);
        }
    }

    #[test]
    fn test_next_blocks_until_enqueue() {
        let queue = Arc::new(ReclaimQueue::new());
        let id = HandleId::next();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || reclaim_id(queue.next().unwrap()))
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue(ReclaimItem::Reclaim(id)).unwrap();
        assert_eq!(consumer.join().unwrap(), id);
    }

    #[test]
    fn test_interrupt_wakes_waiting_consumer() {
        let queue = Arc::new(ReclaimQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.next())
        };

        thread::sleep(Duration::from_millis(50));
        queue.interrupt();
        assert_eq!(consumer.join().unwrap().unwrap_err(), Interrupted);
    }

    #[test]
    fn test_interrupt_discards_pending_items() {
        let queue = ReclaimQueue::new();
        queue.enqueue(ReclaimItem::Reclaim(HandleId::next())).unwrap();
        queue.interrupt();

        assert!(queue.is_interrupted());
        assert_eq!(queue.pending(), 0);
        assert!(queue.next().is_err());
        assert!(queue.enqueue(ReclaimItem::Reclaim(HandleId::next())).is_err());
    }

    #[test]
    fn test_interrupt_closes_pending_flush() {
        let queue = ReclaimQueue::new();
        let (tx, rx) = crate::oneshot::channel();
        queue.enqueue(ReclaimItem::Flush(tx)).unwrap();
        queue.interrupt();
        assert_eq!(rx.recv(), None);
    }
}
