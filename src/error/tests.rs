use {
    crate::{LockError, LockScope},
    std::time::Duration,
};

#[test]
fn display() {
    assert_eq!(
        LockError::InvalidArgument.to_string(),
        "entity id must not be absent",
    );
    let timeout = LockError::Timeout {
        scope: LockScope::Global,
        timeout: Duration::from_millis(20),
    };
    assert_eq!(
        timeout.to_string(),
        "could not acquire the global lock within 20ms",
    );
}

#[test]
fn classify() {
    let timeout = LockError::Timeout {
        scope: LockScope::Entity,
        timeout: Duration::ZERO,
    };
    assert!(timeout.is_timeout());
    assert_eq!(timeout.scope(), Some(LockScope::Entity));
    assert!(!LockError::InvalidArgument.is_timeout());
    assert_eq!(LockError::InvalidArgument.scope(), None);
}
