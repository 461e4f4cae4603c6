use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

#[cfg(test)]
mod tests;

/// Which lock a failed acquisition was waiting for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// The lock of a single entity.
    Entity,
    /// The exclusive side of the global lock.
    Global,
}

impl Display for LockScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockScope::Entity => f.write_str("entity"),
            LockScope::Global => f.write_str("global"),
        }
    }
}

/// The reasons a protected action did not run.
///
/// In every case the action was never invoked.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// No entity ID was supplied. Raised before any lock is touched.
    #[error("entity id must not be absent")]
    InvalidArgument,
    /// The lock could not be acquired in time. The calling thread has been marked as
    /// cancelled, see [`cancellation`](crate::cancellation).
    #[error("could not acquire the {scope} lock within {timeout:?}")]
    Timeout { scope: LockScope, timeout: Duration },
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }

    /// Returns the scope of a timeout, `None` for [`LockError::InvalidArgument`].
    pub fn scope(&self) -> Option<LockScope> {
        match self {
            LockError::InvalidArgument => None,
            LockError::Timeout { scope, .. } => Some(*scope),
        }
    }
}
