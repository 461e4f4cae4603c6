use {
    crate::{Fairness, execution_unit::execution_unit_id},
    parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    std::{
        cell::RefCell,
        collections::HashMap,
        fmt::{Debug, Formatter},
        sync::atomic::{AtomicUsize, Ordering::Relaxed},
        time::Duration,
    },
};


thread_local! {
    // Number of shared holds of the current thread, per global lock.
    static SHARED_DEPTH: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

/// The table-level lock of a [`LockManager`](crate::LockManager).
///
/// Entity actions hold the shared side, global actions the exclusive side. A pending
/// exclusive acquisition blocks new shared acquisitions, except for threads that
/// already hold shared access: those re-acquire recursively, otherwise a nested
/// entity action would wait for a writer that waits for the thread itself.
pub(crate) struct GlobalLock {
    rw: RwLock<()>,
    // The execution unit holding the exclusive side, 0 if none. Only written while
    // the exclusive side is held.
    exclusive_owner: AtomicUsize,
    fairness: Fairness,
}

/// Shared access to a [`GlobalLock`].
///
/// Holds no read lock if the current thread owns the exclusive side.
pub(crate) struct SharedGuard<'a> {
    lock: &'a GlobalLock,
    guard: Option<RwLockReadGuard<'a, ()>>,
}

/// Exclusive access to a [`GlobalLock`].
///
/// Holds no write lock if it was created by a nested acquisition.
pub(crate) struct ExclusiveGuard<'a> {
    lock: &'a GlobalLock,
    guard: Option<RwLockWriteGuard<'a, ()>>,
}

impl GlobalLock {
    pub(crate) fn new(fairness: Fairness) -> Self {
        Self {
            rw: RwLock::new(()),
            exclusive_owner: AtomicUsize::new(0),
            fairness,
        }
    }

    fn key(&self) -> usize {
        let addr: *const RwLock<()> = &self.rw;
        addr as usize
    }

    /// Returns the number of shared holds of the current thread.
    pub(crate) fn shared_depth(&self) -> usize {
        let key = self.key();
        SHARED_DEPTH.with(|depth| depth.borrow().get(&key).copied().unwrap_or(0))
    }

    pub(crate) fn is_held_exclusively_by_current_thread(&self) -> bool {
        self.exclusive_owner.load(Relaxed) == execution_unit_id()
    }

    #[cfg(test)]
    pub(crate) fn is_locked_exclusive(&self) -> bool {
        self.rw.is_locked_exclusive()
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.rw.is_locked()
    }

    /// Acquires shared access, waiting as long as it takes.
    pub(crate) fn shared(&self) -> SharedGuard<'_> {
        if self.is_held_exclusively_by_current_thread() {
            return SharedGuard {
                lock: self,
                guard: None,
            };
        }
        let guard = if self.shared_depth() > 0 {
            self.rw.read_recursive()
        } else {
            self.rw.read()
        };
        let key = self.key();
        SHARED_DEPTH.with(|depth| {
            *depth.borrow_mut().entry(key).or_insert(0) += 1;
        });
        SharedGuard {
            lock: self,
            guard: Some(guard),
        }
    }

    /// Acquires exclusive access, waiting at most `timeout`.
    ///
    /// Returns immediately if the current thread already holds exclusive access.
    pub(crate) fn try_exclusive_for(&self, timeout: Duration) -> Option<ExclusiveGuard<'_>> {
        if self.is_held_exclusively_by_current_thread() {
            return Some(ExclusiveGuard {
                lock: self,
                guard: None,
            });
        }
        let guard = self.rw.try_write_for(timeout)?;
        self.exclusive_owner.store(execution_unit_id(), Relaxed);
        Some(ExclusiveGuard {
            lock: self,
            guard: Some(guard),
        })
    }
}

impl Debug for GlobalLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalLock")
            .field("fairness", &self.fairness)
            .field("locked", &self.rw.is_locked())
            .field("exclusive", &self.rw.is_locked_exclusive())
            .finish_non_exhaustive()
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let key = self.lock.key();
        SHARED_DEPTH.with(|depth| {
            let mut depth = depth.borrow_mut();
            if let Some(n) = depth.get_mut(&key) {
                *n -= 1;
                if *n == 0 {
                    depth.remove(&key);
                }
            }
        });
        match self.lock.fairness {
            Fairness::Fair => RwLockReadGuard::unlock_fair(guard),
            Fairness::Unfair => drop(guard),
        }
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        self.lock.exclusive_owner.store(0, Relaxed);
        match self.lock.fairness {
            Fairness::Fair => RwLockWriteGuard::unlock_fair(guard),
            Fairness::Unfair => drop(guard),
        }
    }
}
