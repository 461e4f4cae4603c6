use {
    crate::cancellation::{is_cancelled, mark_cancelled, take_cancelled},
    std::thread,
};

#[test]
fn mark_and_take() {
    assert!(!is_cancelled());
    mark_cancelled();
    assert!(is_cancelled());
    assert!(is_cancelled());
    assert!(take_cancelled());
    assert!(!is_cancelled());
    assert!(!take_cancelled());
}

#[test]
fn thread_local() {
    mark_cancelled();
    thread::scope(|s| {
        s.spawn(|| {
            assert!(!is_cancelled());
        })
        .join()
        .unwrap();
    });
    assert!(take_cancelled());
}
