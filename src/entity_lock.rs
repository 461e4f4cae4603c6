#[cfg(doc)]
use crate::LockStorage;
use {
    crate::{Fairness, execution_unit::execution_unit_id},
    opera::{PhantomNotSend, PhantomNotSync},
    parking_lot::{
        RawMutex,
        lock_api::{RawMutex as RawMutexTrait, RawMutexFair, RawMutexTimed},
    },
    static_assertions::assert_not_impl_any,
    std::{
        cell::Cell,
        fmt::{Debug, Formatter},
        ptr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering::Relaxed},
        },
        time::Duration,
    },
};


/// The reentrant lock of a single entity.
///
/// An [`EntityLock`] is a cheap handle; clones refer to the same lock. Handles are
/// created by a [`LockStorage`] and handed to the
/// [`LockManager`](crate::LockManager), which is the only code that can acquire them.
/// Outside of the crate a handle can only be created, cloned, compared, and inspected.
///
/// The thread holding the lock may acquire it again any number of times. Each
/// acquisition adds a hold and the lock is released when the last hold is dropped.
///
/// # Example
///
/// ```
/// use entity_lock::{EntityLock, Fairness};
///
/// let lock = EntityLock::new(Fairness::Fair);
/// let handle = lock.clone();
/// assert_eq!(lock, handle);
/// assert_eq!(lock.handle_count(), 2);
/// assert!(!lock.is_locked());
/// ```
#[derive(Clone)]
pub struct EntityLock {
    shared: Arc<Shared>,
}

struct Shared {
    // We enforce the following invariants:
    // 1. if holds > 0, then raw_mutex is locked
    // 2. if owner != 0, then the mutex is locked and the execution unit with the id
    //    owner locked it
    // The current execution unit holds the lock if holds > 0 and owner is the id of
    // the current execution unit.
    raw_mutex: RawMutex,
    // Mutations of this field are protected by the raw_mutex.
    owner: AtomicUsize,
    // This field is protected by the raw_mutex.
    holds: Cell<u64>,
    fairness: Fairness,
}

/// One hold of an [`EntityLock`] by the current thread.
///
/// Dropping the guard gives up the hold. Guards are tied to the thread that created
/// them.
pub(crate) struct EntityGuard<'a> {
    lock: &'a EntityLock,
    _phantom_not_send: PhantomNotSend,
    _phantom_not_sync: PhantomNotSync,
}

// SAFETY: - holds is only accessed by the execution unit that has locked raw_mutex.
//         - All other fields are Send + Sync.
unsafe impl Send for EntityLock {}

// SAFETY: - Dito.
unsafe impl Sync for EntityLock {}

assert_not_impl_any!(EntityGuard<'_>: Sync, Send);

macro_rules! maybe_lock_fast {
    ($slf:expr) => {
        let shared = &*$slf.shared;
        if shared.owner.load(Relaxed) == execution_unit_id() {
            // SAFETY: - We have just checked that owner contains the ID of the current
            //           execution unit.
            //         - By the invariants, the current execution unit is holding the
            //           mutex and no other execution unit is allowed to modify holds.
            return Some(unsafe { $slf.add_hold() });
        }
    };
}

impl Default for EntityLock {
    fn default() -> Self {
        Self::new(Fairness::default())
    }
}

impl EntityLock {
    /// Creates a new, unlocked entity lock.
    pub fn new(fairness: Fairness) -> Self {
        Self {
            shared: Arc::new(Shared {
                raw_mutex: RawMutex::INIT,
                owner: AtomicUsize::new(0),
                holds: Cell::new(0),
                fairness,
            }),
        }
    }

    /// Returns how this lock is handed over on release.
    #[inline]
    pub fn fairness(&self) -> Fairness {
        self.shared.fairness
    }

    /// Returns whether any thread holds this lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.shared.raw_mutex.is_locked()
    }

    /// Returns whether the current thread holds this lock.
    #[inline]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.shared.owner.load(Relaxed) == execution_unit_id()
    }

    /// Returns the number of live handles referring to this lock.
    ///
    /// A [`LockStorage`] that hands out handles only while it is itself locked can
    /// use this to tell whether anyone besides the table still refers to the lock.
    #[inline]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Returns the number of holds of the current thread, 0 if it does not hold the
    /// lock.
    pub(crate) fn hold_count(&self) -> u64 {
        if self.is_held_by_current_thread() {
            // By the invariants the current execution unit holds the mutex and is
            // allowed to read this field.
            self.shared.holds.get()
        } else {
            0
        }
    }

    /// Acquires this lock, waiting at most `timeout`.
    ///
    /// Returns immediately if the current thread already holds the lock.
    #[inline]
    pub(crate) fn try_lock_for(&self, timeout: Duration) -> Option<EntityGuard<'_>> {
        maybe_lock_fast!(self);
        self.try_lock_for_slow(timeout)
    }

    #[cold]
    #[inline]
    fn try_lock_for_slow(&self, timeout: Duration) -> Option<EntityGuard<'_>> {
        self.shared.raw_mutex.try_lock_for(timeout).then(|| {
            // SAFETY: - We've just locked the mutex.
            unsafe { self.add_hold_after_lock() }
        })
    }

    /// # Safety
    ///
    /// - The current execution unit must just have succeeded in locking the mutex.
    #[inline]
    unsafe fn add_hold_after_lock(&self) -> EntityGuard<'_> {
        // SAFETY: - By the requirements of this function, we've just locked the mutex.
        //         - Therefore setting owner to the ID of the current execution unit
        //           upholds the invariant.
        self.shared.owner.store(execution_unit_id(), Relaxed);
        // SAFETY: - We have just set owner to the ID of the current execution unit.
        unsafe { self.add_hold() }
    }

    /// # Safety
    ///
    /// - owner must be the ID of the current execution unit.
    #[inline]
    unsafe fn add_hold(&self) -> EntityGuard<'_> {
        let shared = &*self.shared;
        let holds = shared.holds.get();
        if holds == u64::MAX {
            #[cold]
            fn never() -> ! {
                #[allow(clippy::empty_loop)]
                loop {}
            }
            never();
        }
        // SAFETY: - By the requirements of this function we hold the mutex.
        //         - Setting holds to holds + 1 > 0 upholds the invariant.
        shared.holds.set(holds + 1);
        EntityGuard {
            lock: self,
            _phantom_not_send: Default::default(),
            _phantom_not_sync: Default::default(),
        }
    }

    /// # Safety
    ///
    /// - owner must be the ID of the calling execution unit.
    /// - holds must be > 0 and the caller must give up one of them.
    #[inline]
    unsafe fn release(&self) {
        let shared = &*self.shared;
        let holds = shared.holds.get();
        debug_assert!(holds > 0);
        shared.holds.set(holds - 1);
        if holds == 1 {
            // SAFETY: - We've just set holds to 0.
            //         - The owner requirement is forwarded to the caller.
            unsafe {
                self.release_slow();
            }
        }
    }

    /// # Safety
    ///
    /// - holds must be 0.
    /// - owner must be the ID of the current execution unit.
    #[cold]
    #[inline]
    unsafe fn release_slow(&self) {
        let shared = &*self.shared;
        debug_assert_eq!(shared.owner.load(Relaxed), execution_unit_id());
        debug_assert_eq!(shared.holds.get(), 0);
        shared.owner.store(0, Relaxed);
        // SAFETY: - By the requirements of this function, the current execution unit
        //           is holding the mutex and no hold is left.
        unsafe {
            match shared.fairness {
                Fairness::Fair => shared.raw_mutex.unlock_fair(),
                Fairness::Unfair => shared.raw_mutex.unlock(),
            }
        }
    }

    #[inline]
    fn addr(&self) -> *const u8 {
        let addr: *const Shared = &*self.shared;
        addr.cast()
    }
}

impl Debug for EntityLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLock")
            .field("id", &self.addr())
            .field("fairness", &self.shared.fairness)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl PartialEq for EntityLock {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq::<Shared>(&*self.shared, &*other.shared)
    }
}

impl Eq for EntityLock {}

impl Drop for EntityGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: - Each guard owns a hold, so owner is the ID of the current execution
        //           unit and holds > 0.
        unsafe {
            self.lock.release();
        }
    }
}

impl Debug for EntityGuard<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityGuard")
            .field("lock_id", &self.lock.addr())
            .finish_non_exhaustive()
    }
}
