//! Lock tables mapping entity IDs to their [`EntityLock`]s.

use {
    crate::{EntityLock, Fairness, LockError},
    parking_lot::RwLock,
    std::{
        collections::HashMap,
        fmt::{Debug, Formatter},
        hash::Hash,
    },
    tracing::trace,
};


/// Owns the entity lock of every entity ID.
///
/// The [`LockManager`](crate::LockManager) calls [`acquire_lock_handle`] before every
/// entity action and [`release_lock_handle`] once the action has finished and the
/// handle has been dropped.
///
/// [`acquire_lock_handle`]: LockStorage::acquire_lock_handle
/// [`release_lock_handle`]: LockStorage::release_lock_handle
pub trait LockStorage<K>: Send + Sync {
    /// Returns the lock of `id`, creating it if it does not exist.
    ///
    /// Concurrent calls for an ID that has not been seen before must all return
    /// handles to the same lock.
    ///
    /// Fails with [`LockError::InvalidArgument`] if `id` is `None`. The table is not
    /// modified in that case.
    fn acquire_lock_handle(&self, id: Option<&K>) -> Result<EntityLock, LockError>;

    /// Called after a handle returned by [`LockStorage::acquire_lock_handle`] for `id`
    /// has been dropped. Also called if that acquisition failed.
    fn release_lock_handle(&self, _id: &K) {}

    /// Returns the number of entries in the table.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct LockTable<K> {
    locks: RwLock<HashMap<K, EntityLock>>,
    fairness: Fairness,
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn new(fairness: Fairness) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            fairness,
        }
    }

    fn get_or_insert(&self, id: Option<&K>) -> Result<EntityLock, LockError> {
        let id = id.ok_or(LockError::InvalidArgument)?;
        if let Some(lock) = self.locks.read().get(id) {
            return Ok(lock.clone());
        }
        let mut locks = self.locks.write();
        let lock = locks
            .entry(id.clone())
            .or_insert_with(|| {
                trace!("creating entity lock");
                EntityLock::new(self.fairness)
            })
            .clone();
        Ok(lock)
    }

    fn len(&self) -> usize {
        self.locks.read().len()
    }
}

/// A lock table that never forgets an ID.
///
/// Every ID ever passed to [`LockStorage::acquire_lock_handle`] keeps its entry for
/// the lifetime of the table. Use [`ReclaimingLockStorage`] if the ID space is large.
///
/// # Example
///
/// ```
/// use entity_lock::{ConcurrentLockStorage, Fairness, LockStorage};
///
/// let storage = ConcurrentLockStorage::new(Fairness::Unfair);
/// let lock1 = storage.acquire_lock_handle(Some(&"alice")).unwrap();
/// let lock2 = storage.acquire_lock_handle(Some(&"alice")).unwrap();
/// assert_eq!(lock1, lock2);
/// assert!(storage.acquire_lock_handle(None).is_err());
/// assert_eq!(storage.len(), 1);
/// ```
pub struct ConcurrentLockStorage<K> {
    table: LockTable<K>,
}

impl<K> ConcurrentLockStorage<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(fairness: Fairness) -> Self {
        Self {
            table: LockTable::new(fairness),
        }
    }
}

impl<K> Default for ConcurrentLockStorage<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(Fairness::default())
    }
}

impl<K> LockStorage<K> for ConcurrentLockStorage<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn acquire_lock_handle(&self, id: Option<&K>) -> Result<EntityLock, LockError> {
        self.table.get_or_insert(id)
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

impl<K> Debug for ConcurrentLockStorage<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentLockStorage")
            .field("fairness", &self.table.fairness)
            .field("len", &self.table.locks.read().len())
            .finish()
    }
}

/// A lock table that drops the entry of an ID as soon as no caller refers to it.
///
/// Handles are only cloned out of the table while the table is locked, so once the
/// table holds the only handle of a lock, no thread holds or waits for that lock and
/// the entry can be removed. The next reference to the ID creates a fresh lock.
///
/// # Example
///
/// ```
/// use entity_lock::{Fairness, LockStorage, ReclaimingLockStorage};
///
/// let storage = ReclaimingLockStorage::new(Fairness::Unfair);
/// let lock = storage.acquire_lock_handle(Some(&7)).unwrap();
/// assert_eq!(storage.len(), 1);
/// drop(lock);
/// storage.release_lock_handle(&7);
/// assert!(storage.is_empty());
/// ```
pub struct ReclaimingLockStorage<K> {
    table: LockTable<K>,
}

impl<K> ReclaimingLockStorage<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(fairness: Fairness) -> Self {
        Self {
            table: LockTable::new(fairness),
        }
    }

    fn is_unused(locks: &HashMap<K, EntityLock>, id: &K) -> bool {
        locks.get(id).is_some_and(|lock| lock.handle_count() == 1)
    }
}

impl<K> Default for ReclaimingLockStorage<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(Fairness::default())
    }
}

impl<K> LockStorage<K> for ReclaimingLockStorage<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn acquire_lock_handle(&self, id: Option<&K>) -> Result<EntityLock, LockError> {
        self.table.get_or_insert(id)
    }

    fn release_lock_handle(&self, id: &K) {
        if !Self::is_unused(&self.table.locks.read(), id) {
            return;
        }
        let mut locks = self.table.locks.write();
        // Another thread may have cloned the handle between the two locks.
        if Self::is_unused(&locks, id) {
            locks.remove(id);
            trace!(remaining = locks.len(), "reclaimed entity lock");
        }
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}

impl<K> Debug for ReclaimingLockStorage<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimingLockStorage")
            .field("fairness", &self.table.fairness)
            .field("len", &self.table.locks.read().len())
            .finish()
    }
}
