//! Per-thread cancellation marker.
//!
//! When a `run_*` call of a [`LockManager`](crate::LockManager) gives up waiting for a
//! lock, it marks the calling thread as cancelled in addition to returning
//! [`LockError::Timeout`](crate::LockError::Timeout). Code further up the stack that
//! only sees a swallowed error, such as a worker loop, can still observe that a job on
//! this thread was cancelled.
//!
//! The marker stays set until it is consumed with [`take_cancelled`].
//!
//! # Example
//!
//! ```
//! use entity_lock::cancellation;
//!
//! assert!(!cancellation::is_cancelled());
//! ```

use std::cell::Cell;

#[cfg(test)]
mod tests;

thread_local!(static CANCELLED: Cell<bool> = const { Cell::new(false) });

/// Returns whether the current thread has been marked as cancelled.
pub fn is_cancelled() -> bool {
    CANCELLED.with(Cell::get)
}

/// Returns whether the current thread has been marked as cancelled and clears the
/// marker.
pub fn take_cancelled() -> bool {
    CANCELLED.with(|c| c.replace(false))
}

pub(crate) fn mark_cancelled() {
    CANCELLED.with(|c| c.set(true));
}
