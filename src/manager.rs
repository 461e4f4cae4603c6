use {
    crate::{
        ConcurrentLockStorage, LockConfig, LockError, LockScope, LockStorage, cancellation,
        global_lock::GlobalLock,
    },
    run_on_drop::on_drop,
    static_assertions::assert_impl_all,
    std::{
        fmt::{Debug, Formatter},
        hash::Hash,
        marker::PhantomData,
        time::Duration,
    },
    tracing::{debug, trace, warn},
};

#[cfg(test)]
mod tests;

/// Runs actions under the lock of a single entity or under the global lock.
///
/// Entity actions for the same ID are serialized, entity actions for different IDs
/// run concurrently, and a global action runs only while no entity action runs.
///
/// Every entry point accepts the entity ID as `&K` or as `None`. The latter is
/// rejected with [`LockError::InvalidArgument`].
///
/// Locks are reentrant: an action may call back into the manager for the same or
/// another entity, and a global action may run entity actions. Acquiring entity
/// locks of different IDs in different orders on different threads can deadlock.
///
/// A global action cannot be started from inside an entity action on the same thread
/// since that would require upgrading the thread's shared hold. Such calls fail
/// immediately with [`LockError::Timeout`].
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
/// use std::thread;
/// use entity_lock::LockManager;
///
/// let manager = LockManager::<u64>::new();
/// let alice = 1;
/// let bob = 2;
/// let counter = AtomicU64::new(0);
///
/// thread::scope(|s| {
///     for id in [alice, bob, alice] {
///         let (manager, counter) = (&manager, &counter);
///         s.spawn(move || {
///             manager
///                 .run_with_lock(&id, || counter.fetch_add(1, Relaxed))
///                 .unwrap();
///         });
///     }
/// });
/// manager
///     .run_with_global_lock(|| assert_eq!(counter.load(Relaxed), 3))
///     .unwrap();
/// ```
pub struct LockManager<K, S = ConcurrentLockStorage<K>> {
    storage: S,
    global: GlobalLock,
    config: LockConfig,
    _id: PhantomData<fn(&K)>,
}

assert_impl_all!(LockManager<u64>: Send, Sync);

impl<K> LockManager<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    /// Creates a manager with the default configuration and a
    /// [`ConcurrentLockStorage`].
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Creates a manager with a [`ConcurrentLockStorage`] whose locks use the
    /// configured entity fairness.
    pub fn with_config(config: LockConfig) -> Self {
        Self::with_storage(ConcurrentLockStorage::new(config.entity_fairness), config)
    }
}

impl<K> Default for LockManager<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> LockManager<K, S>
where
    S: LockStorage<K>,
{
    /// Creates a manager on top of `storage`.
    ///
    /// The fairness of the entity locks is decided by `storage`;
    /// [`LockConfig::entity_fairness`] is not consulted.
    pub fn with_storage(storage: S, config: LockConfig) -> Self {
        Self {
            storage,
            global: GlobalLock::new(config.global_fairness),
            config,
            _id: PhantomData,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Runs `action` under the lock of `id`, waiting at most
    /// [`LockConfig::default_timeout`] for the lock.
    ///
    /// See [`LockManager::run_with_lock_for`].
    pub fn run_with_lock<'k, R>(
        &self,
        id: impl Into<Option<&'k K>>,
        action: impl FnOnce() -> R,
    ) -> Result<R, LockError>
    where
        K: 'k,
    {
        self.run_with_lock_for(id, action, self.config.default_timeout)
    }

    /// Runs `action` under the lock of `id`, waiting at most `timeout` for the lock.
    ///
    /// While the action runs, the thread also holds shared access to the global lock.
    /// Waiting for that is not bounded by `timeout` since it only waits for a global
    /// action to finish.
    ///
    /// Both locks are released on every exit path, including a panicking action. The
    /// shared access is released first.
    ///
    /// # Errors
    ///
    /// - [`LockError::InvalidArgument`] if `id` is `None`.
    /// - [`LockError::Timeout`] if the entity lock was not acquired in time. The
    ///   current thread is marked as cancelled.
    ///
    /// The action is not invoked in either case.
    pub fn run_with_lock_for<'k, R>(
        &self,
        id: impl Into<Option<&'k K>>,
        action: impl FnOnce() -> R,
        timeout: Duration,
    ) -> Result<R, LockError>
    where
        K: 'k,
    {
        let Some(id) = id.into() else {
            debug!("rejected entity action without an entity id");
            return Err(LockError::InvalidArgument);
        };
        let _release = on_drop(|| self.storage.release_lock_handle(id));
        let handle = self.storage.acquire_lock_handle(Some(id))?;
        let Some(_entity) = handle.try_lock_for(timeout) else {
            cancellation::mark_cancelled();
            debug!(?timeout, "timed out waiting for entity lock");
            return Err(LockError::Timeout {
                scope: LockScope::Entity,
                timeout,
            });
        };
        let _shared = self.global.shared();
        trace!(holds = handle.hold_count(), "running entity action");
        Ok(action())
    }

    /// Like [`LockManager::run_with_lock`] but for fallible actions.
    ///
    /// Lock errors are converted into the action's error type.
    ///
    /// # Example
    ///
    /// ```
    /// use entity_lock::{LockError, LockManager};
    ///
    /// #[derive(Debug)]
    /// enum Error {
    ///     Lock(LockError),
    ///     Overdrawn,
    /// }
    ///
    /// impl From<LockError> for Error {
    ///     fn from(e: LockError) -> Self {
    ///         Error::Lock(e)
    ///     }
    /// }
    ///
    /// let manager = LockManager::<u32>::new();
    /// let account: u32 = 7;
    /// let res = manager.try_run_with_lock(&account, || Err::<(), _>(Error::Overdrawn));
    /// assert!(matches!(res, Err(Error::Overdrawn)));
    /// let res = manager.try_run_with_lock(None::<&u32>, || Ok::<_, Error>(()));
    /// assert!(matches!(res, Err(Error::Lock(LockError::InvalidArgument))));
    /// ```
    pub fn try_run_with_lock<'k, T, E>(
        &self,
        id: impl Into<Option<&'k K>>,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        K: 'k,
        E: From<LockError>,
    {
        self.run_with_lock(id, action)?
    }

    /// Runs `action` under the exclusive global lock, waiting at most
    /// [`LockConfig::default_timeout`] for it.
    ///
    /// See [`LockManager::run_with_global_lock_for`].
    pub fn run_with_global_lock<R>(&self, action: impl FnOnce() -> R) -> Result<R, LockError> {
        self.run_with_global_lock_for(action, self.config.default_timeout)
    }

    /// Runs `action` under the exclusive global lock, waiting at most `timeout` for it.
    ///
    /// The lock becomes available once all running entity actions have finished.
    /// While this call waits, no new entity action can start. The lock is released on
    /// every exit path.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if the lock was not acquired in time or the current
    /// thread is running an entity action of this manager. The current thread is
    /// marked as cancelled and the action is not invoked.
    pub fn run_with_global_lock_for<R>(
        &self,
        action: impl FnOnce() -> R,
        timeout: Duration,
    ) -> Result<R, LockError> {
        let timed_out = || {
            cancellation::mark_cancelled();
            Err(LockError::Timeout {
                scope: LockScope::Global,
                timeout,
            })
        };
        if self.global.shared_depth() > 0 {
            warn!("global action requested inside an entity action, escalation is unsupported");
            return timed_out();
        }
        let Some(_exclusive) = self.global.try_exclusive_for(timeout) else {
            debug!(?timeout, "timed out waiting for global lock");
            return timed_out();
        };
        trace!("running global action");
        Ok(action())
    }

    /// Like [`LockManager::run_with_global_lock`] but for fallible actions.
    ///
    /// Lock errors are converted into the action's error type.
    pub fn try_run_with_global_lock<T, E>(
        &self,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<LockError>,
    {
        self.run_with_global_lock(action)?
    }
}

impl<K, S> Debug for LockManager<K, S>
where
    S: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("storage", &self.storage)
            .field("global", &self.global)
            .field("config", &self.config)
            .finish()
    }
}
