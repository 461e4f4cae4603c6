//! This crate provides [`LockManager`], which gives row-level locks to arbitrary
//! entities plus a table-level lock over all of them.
//!
//! # Motivation
//!
//! Application code often keeps a set of entities, such as users or accounts, that are
//! updated concurrently. Updates of one entity must be serialized, updates of different
//! entities should not be. From time to time a job needs to see every entity at once,
//! for example to recompute aggregate state or to migrate data, and must not overlap
//! with any entity update.
//!
//! Databases solve this with row-level and table-level locks. This crate provides the
//! same semantics for in-memory entities of a single process:
//!
//! - [`LockManager::run_with_lock`] runs an action while holding the lock of one
//!   entity ID.
//! - [`LockManager::run_with_global_lock`] runs an action while no entity action is
//!   running.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
//! use std::time::Duration;
//! use entity_lock::{LockManager, LockError};
//!
//! struct User {
//!     id: u64,
//!     score: AtomicU64,
//! }
//!
//! let manager = LockManager::<u64>::new();
//! let user = User { id: 1, score: AtomicU64::new(0) };
//!
//! manager
//!     .run_with_lock(&user.id, || {
//!         let score = user.score.load(Relaxed);
//!         user.score.store(score + 1, Relaxed);
//!     })
//!     .unwrap();
//!
//! let total = manager
//!     .run_with_global_lock_for(|| user.score.load(Relaxed), Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(total, 1);
//!
//! assert_eq!(
//!     manager.run_with_lock(None::<&u64>, || ()),
//!     Err(LockError::InvalidArgument),
//! );
//! ```
//!
//! # Timeouts and cancellation
//!
//! Every acquisition is bounded by a timeout, 10 seconds unless configured otherwise
//! with [`LockConfig`]. If the lock cannot be acquired in time, the action is not
//! invoked, [`LockError::Timeout`] is returned, and the calling thread is marked as
//! cancelled, see [`cancellation`]. Nothing is retried.
//!
//! # Lock table
//!
//! Entity locks live in a [`LockStorage`]. [`ConcurrentLockStorage`] keeps the lock of
//! every ID it has ever seen. [`ReclaimingLockStorage`] drops the lock of an ID once no
//! thread refers to it.
//!
//! Promoting many held entity locks to the global lock (lock escalation) is not
//! supported.

pub use {
    config::{DEFAULT_TIMEOUT, Fairness, LockConfig},
    entity_lock::EntityLock,
    error::{LockError, LockScope},
    manager::LockManager,
    storage::{ConcurrentLockStorage, LockStorage, ReclaimingLockStorage},
};

pub mod cancellation;
mod config;
mod entity_lock;
mod error;
mod execution_unit;
mod global_lock;
mod manager;
mod storage;
