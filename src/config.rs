use std::time::Duration;


/// The timeout used by [`LockManager::run_with_lock`] and
/// [`LockManager::run_with_global_lock`] unless configured otherwise.
///
/// [`LockManager::run_with_lock`]: crate::LockManager::run_with_lock
/// [`LockManager::run_with_global_lock`]: crate::LockManager::run_with_global_lock
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a released lock is handed to waiting threads.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Fairness {
    /// The releasing thread, or any thread arriving at the right moment, may barge in
    /// ahead of threads that are already waiting. Higher throughput.
    #[default]
    Unfair,
    /// The lock is handed directly to the longest waiting thread on release.
    Fair,
}

/// Construction-time options of a [`LockManager`](crate::LockManager).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use entity_lock::{Fairness, LockConfig};
///
/// let config = LockConfig::default()
///     .with_default_timeout(Duration::from_secs(1))
///     .with_entity_fairness(Fairness::Fair);
/// assert_eq!(config.global_fairness, Fairness::Unfair);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct LockConfig {
    /// Timeout of the `run_*` calls that do not take an explicit one.
    pub default_timeout: Duration,
    /// Fairness of every per-entity lock.
    pub entity_fairness: Fairness,
    /// Fairness of the global read/write lock.
    pub global_fairness: Fairness,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            entity_fairness: Fairness::Unfair,
            global_fairness: Fairness::Unfair,
        }
    }
}

impl LockConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_entity_fairness(mut self, fairness: Fairness) -> Self {
        self.entity_fairness = fairness;
        self
    }

    pub fn with_global_fairness(mut self, fairness: Fairness) -> Self {
        self.global_fairness = fairness;
        self
    }

    /// Uses `fairness` for both the entity locks and the global lock.
    pub fn with_fairness(self, fairness: Fairness) -> Self {
        self.with_entity_fairness(fairness)
            .with_global_fairness(fairness)
    }
}
