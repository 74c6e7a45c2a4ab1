//! Single-value completion signal between the reclaim worker and a waiting caller.
//!
//! The sender travels through the reclaim queue inside a flush request. The
//! worker answers by sending a value; if the request is discarded instead (the
//! queue was interrupted), dropping the sender closes the channel and wakes the
//! receiver with `None`.

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Creates a new oneshot channel, returning a sender and receiver pair.
pub(crate) fn channel<T>() -> (OneshotSender<T>, OneshotReceiver<T>) {
    let cell = Arc::new(OneshotCell {
        state: Mutex::new(State::Pending),
        condvar: Condvar::new(),
    });
    (OneshotSender(cell.clone()), OneshotReceiver(cell))
}

/// The sending half of a oneshot channel.
pub struct OneshotSender<T>(Arc<OneshotCell<T>>);

impl<T> OneshotSender<T> {
    /// Delivers `value` to the receiver. Returns the value back if the channel
    /// is no longer pending.
    pub(crate) fn send(self, value: T) -> Result<(), T> {
        self.0.set(value)
    }
}

impl<T> Drop for OneshotSender<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl<T> std::fmt::Debug for OneshotSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneshotSender").finish_non_exhaustive()
    }
}

/// The receiving half of a oneshot channel.
pub(crate) struct OneshotReceiver<T>(Arc<OneshotCell<T>>);

impl<T> OneshotReceiver<T> {
    /// Blocks until a value is sent or the sender is dropped.
    pub(crate) fn recv(&self) -> Option<T> {
        let guard = self.0.lock();
        let mut guard = self
            .0
            .condvar
            .wait_while(guard, |state| state.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    /// Waits at most `timeout` for a value.
    ///
    /// Returns `Err(RecvTimeoutError::Timeout)` if the channel is still pending
    /// when the timeout elapses.
    pub(crate) fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<T>, std::sync::mpsc::RecvTimeoutError> {
        let guard = self.0.lock();
        let (mut guard, res) = self
            .0
            .condvar
            .wait_timeout_while(guard, timeout, |state| state.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        if res.timed_out() && guard.is_pending() {
            Err(std::sync::mpsc::RecvTimeoutError::Timeout)
        } else {
            Ok(guard.take())
        }
    }
}

struct OneshotCell<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> OneshotCell<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, value: T) -> Result<(), T> {
        let res = self.lock().set(value);
        self.condvar.notify_all();
        res
    }

    fn close(&self) {
        self.lock().cancel();
        self.condvar.notify_all();
    }
}

/// `Pending -> Ready(T) -> Consumed`, or `Pending -> Consumed` when the sender
/// goes away without sending.
enum State<T> {
    Pending,
    Ready(T),
    Consumed,
}

impl<T> State<T> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    fn set(&mut self, value: T) -> Result<(), T> {
        match self {
            State::Pending => {
                *self = State::Ready(value);
                Ok(())
            }
            State::Ready(_) | State::Consumed => Err(value),
        }
    }

    fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, State::Consumed) {
            State::Ready(value) => Some(value),
            State::Pending | State::Consumed => None,
        }
    }

    fn cancel(&mut self) {
        if self.is_pending() {
            *self = State::Consumed;
        }
    }
}
