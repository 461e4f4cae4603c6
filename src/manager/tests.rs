use {
    crate::{
        Fairness, LockConfig, LockError, LockManager, LockScope, LockStorage,
        ReclaimingLockStorage, cancellation,
    },
    std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            Barrier,
            atomic::{
                AtomicBool, AtomicU64, AtomicUsize,
                Ordering::{Relaxed, SeqCst},
            },
        },
        thread,
        time::{Duration, Instant},
    },
};

const POOL_SIZE: usize = 10;
const SHORT: Duration = Duration::from_millis(50);
const WORK: Duration = Duration::from_micros(100);

struct User {
    id: u64,
    score: AtomicU64,
}

impl User {
    fn new(id: u64) -> Self {
        Self {
            id,
            score: AtomicU64::new(0),
        }
    }

    // Load and store are split by a sleep so that concurrent increments lose updates.
    fn increment(&self) {
        let prev = self.score.load(Relaxed);
        thread::sleep(WORK);
        self.score.store(prev + 1, Relaxed);
    }

    fn score(&self) -> u64 {
        self.score.load(Relaxed)
    }
}

fn run_pool(jobs: usize, job: impl Fn() + Sync) {
    let next = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..POOL_SIZE {
            s.spawn(|| {
                while next.fetch_add(1, Relaxed) < jobs {
                    job();
                }
            });
        }
    });
}

fn run_in_thread<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    thread::scope(|s| s.spawn(|| f()).join().unwrap())
}

fn one_entity_test(config: LockConfig, jobs: usize) {
    let manager = LockManager::<u64>::with_config(config);
    let user = User::new(1);
    run_pool(jobs, || {
        manager.run_with_lock(&user.id, || user.increment()).unwrap();
    });
    assert_eq!(user.score(), jobs as u64);
    assert_eq!(manager.storage().len(), 1);
}

#[test]
fn one_entity_1() {
    one_entity_test(LockConfig::default(), 1);
}

#[test]
fn one_entity_2() {
    one_entity_test(LockConfig::default(), 2);
}

#[test]
fn one_entity_5() {
    one_entity_test(LockConfig::default(), 5);
}

#[test]
fn one_entity_10() {
    one_entity_test(LockConfig::default(), 10);
}

#[test]
fn one_entity_100() {
    one_entity_test(LockConfig::default(), 100);
}

#[test]
fn one_entity_1000() {
    one_entity_test(LockConfig::default(), 1_000);
}

#[test]
fn one_entity_fair() {
    one_entity_test(LockConfig::default().with_fairness(Fairness::Fair), 100);
}

fn two_entities_test(jobs: usize) {
    let manager = LockManager::<u64>::new();
    let user1 = User::new(1);
    let user2 = User::new(2);
    thread::scope(|s| {
        s.spawn(|| {
            run_pool(jobs, || {
                manager.run_with_lock(&user1.id, || user1.increment()).unwrap();
            })
        });
        s.spawn(|| {
            run_pool(jobs, || {
                manager.run_with_lock(&user2.id, || user2.increment()).unwrap();
            })
        });
    });
    assert_eq!(user1.score(), jobs as u64);
    assert_eq!(user2.score(), jobs as u64);
    assert_eq!(manager.storage().len(), 2);
}

#[test]
fn two_entities_1() {
    two_entities_test(1);
}

#[test]
fn two_entities_10() {
    two_entities_test(10);
}

#[test]
fn two_entities_1000() {
    two_entities_test(1_000);
}

#[test]
fn distinct_entities_run_concurrently() {
    let manager = LockManager::<u64>::new();
    let user1 = User::new(1);
    let user2 = User::new(2);
    let both_inside = Barrier::new(2);
    // Each action waits for the other one to be running. This only completes if the
    // actions are not serialized.
    thread::scope(|s| {
        for user in [&user1, &user2] {
            let (manager, both_inside) = (&manager, &both_inside);
            s.spawn(move || {
                manager
                    .run_with_lock(&user.id, || {
                        both_inside.wait();
                        user.increment();
                    })
                    .unwrap();
            });
        }
    });
    assert_eq!(user1.score(), 1);
    assert_eq!(user2.score(), 1);
}

fn global_test(config: LockConfig, jobs: usize) {
    let global_jobs = jobs / 10;
    let manager = LockManager::<u64>::with_config(config);
    let user1 = User::new(1);
    let user2 = User::new(2);
    let running_entity_actions = AtomicUsize::new(0);
    thread::scope(|s| {
        s.spawn(|| {
            run_pool(jobs, || {
                manager
                    .run_with_lock(&user1.id, || {
                        running_entity_actions.fetch_add(1, SeqCst);
                        user1.increment();
                        running_entity_actions.fetch_sub(1, SeqCst);
                    })
                    .unwrap();
            })
        });
        s.spawn(|| {
            run_pool(global_jobs, || {
                manager
                    .run_with_global_lock(|| {
                        assert_eq!(running_entity_actions.load(SeqCst), 0);
                        user1.increment();
                        user2.increment();
                        assert_eq!(running_entity_actions.load(SeqCst), 0);
                    })
                    .unwrap();
            })
        });
    });
    assert_eq!(user1.score(), (jobs + global_jobs) as u64);
    assert_eq!(user2.score(), global_jobs as u64);
}

#[test]
fn global_1() {
    global_test(LockConfig::default(), 1);
}

#[test]
fn global_10() {
    global_test(LockConfig::default(), 10);
}

#[test]
fn global_100() {
    global_test(LockConfig::default(), 100);
}

#[test]
fn global_1000() {
    global_test(LockConfig::default(), 1_000);
}

#[test]
fn global_fair() {
    global_test(LockConfig::default().with_fairness(Fairness::Fair), 100);
}

#[test]
fn global_blocks_new_entity_actions() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let global_running = Barrier::new(2);
    let global_done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            manager
                .run_with_global_lock(|| {
                    global_running.wait();
                    thread::sleep(SHORT);
                    global_done.store(true, SeqCst);
                })
                .unwrap();
        });
        global_running.wait();
        manager
            .run_with_lock(&user.id, || {
                assert!(global_done.load(SeqCst));
                user.increment();
            })
            .unwrap();
    });
    assert_eq!(user.score(), 1);
}

#[test]
fn absent_id() {
    let manager = LockManager::<u64>::new();
    let invoked = AtomicBool::new(false);
    let res = manager.run_with_lock(None::<&u64>, || invoked.store(true, SeqCst));
    assert_eq!(res, Err(LockError::InvalidArgument));
    assert!(!invoked.load(SeqCst));
    assert!(manager.storage().is_empty());
    assert!(!cancellation::is_cancelled());
}

#[test]
fn entity_timeout() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let locked = Barrier::new(2);
    let release = Barrier::new(2);
    let invoked = AtomicBool::new(false);
    thread::scope(|s| {
        let holder = s.spawn(|| {
            let res = manager.run_with_lock(&user.id, || {
                locked.wait();
                release.wait();
                user.increment();
            });
            (res, cancellation::is_cancelled())
        });
        locked.wait();
        let start = Instant::now();
        let res = manager.run_with_lock_for(&user.id, || invoked.store(true, SeqCst), SHORT);
        assert!(start.elapsed() >= SHORT);
        assert_eq!(
            res,
            Err(LockError::Timeout {
                scope: LockScope::Entity,
                timeout: SHORT,
            }),
        );
        assert!(cancellation::take_cancelled());
        release.wait();
        assert_eq!(holder.join().unwrap(), (Ok(()), false));
    });
    assert!(!invoked.load(SeqCst));
    assert_eq!(user.score(), 1);
}

#[test]
fn global_timeout() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let locked = Barrier::new(2);
    let release = Barrier::new(2);
    thread::scope(|s| {
        s.spawn(|| {
            manager
                .run_with_lock(&user.id, || {
                    locked.wait();
                    release.wait();
                })
                .unwrap();
        });
        locked.wait();
        let res = manager.run_with_global_lock_for(|| user.increment(), SHORT);
        assert_eq!(
            res,
            Err(LockError::Timeout {
                scope: LockScope::Global,
                timeout: SHORT,
            }),
        );
        assert!(cancellation::take_cancelled());
        release.wait();
    });
    assert_eq!(user.score(), 0);
    manager.run_with_global_lock(|| user.increment()).unwrap();
    assert_eq!(user.score(), 1);
}

#[test]
fn reentrant() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let res = manager.run_with_lock(&user.id, || {
        user.increment();
        manager.run_with_lock(&user.id, || {
            user.increment();
            manager.run_with_lock_for(&user.id, || user.increment(), Duration::ZERO)
        })
    });
    assert_eq!(res, Ok(Ok(Ok(()))));
    assert_eq!(user.score(), 3);
    assert_eq!(manager.storage().len(), 1);
    run_in_thread(|| {
        let res = manager.run_with_lock_for(&user.id, || user.increment(), Duration::ZERO);
        assert_eq!(res, Ok(()));
    });
    assert_eq!(user.score(), 4);
}

#[test]
fn nested_entity_with_pending_global() {
    let manager = LockManager::<u64>::new();
    let user1 = User::new(1);
    let user2 = User::new(2);
    let entity_running = Barrier::new(2);
    let global_ran = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            entity_running.wait();
            manager
                .run_with_global_lock(|| global_ran.store(true, SeqCst))
                .unwrap();
        });
        manager
            .run_with_lock(&user1.id, || {
                entity_running.wait();
                // Give the global action time to start waiting.
                thread::sleep(SHORT);
                manager.run_with_lock(&user2.id, || user2.increment()).unwrap();
                assert!(!global_ran.load(SeqCst));
            })
            .unwrap();
    });
    assert!(global_ran.load(SeqCst));
    assert_eq!(user2.score(), 1);
}

#[test]
fn entity_inside_global() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let res = manager.run_with_global_lock(|| {
        manager.run_with_lock(&user.id, || {
            user.increment();
            manager.run_with_global_lock(|| user.increment())
        })
    });
    assert_eq!(res, Ok(Ok(Ok(()))));
    assert_eq!(user.score(), 2);
    run_in_thread(|| {
        assert_eq!(
            manager.run_with_global_lock_for(|| (), Duration::ZERO),
            Ok(()),
        );
    });
}

#[test]
fn global_inside_entity() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let invoked = AtomicBool::new(false);
    let res = manager.run_with_lock(&user.id, || {
        let start = Instant::now();
        let res = manager.run_with_global_lock(|| invoked.store(true, SeqCst));
        assert!(start.elapsed() < Duration::from_secs(1));
        res
    });
    assert_eq!(
        res,
        Ok(Err(LockError::Timeout {
            scope: LockScope::Global,
            timeout: Duration::from_secs(10),
        })),
    );
    assert!(cancellation::take_cancelled());
    assert!(!invoked.load(SeqCst));
    assert_eq!(manager.run_with_global_lock(|| ()), Ok(()));
}

#[test]
fn panic_releases_locks() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let res = panic::catch_unwind(AssertUnwindSafe(|| {
        manager.run_with_lock(&user.id, || -> u64 { panic!("entity action failed") })
    }));
    assert!(res.is_err());
    let res = panic::catch_unwind(AssertUnwindSafe(|| {
        manager.run_with_global_lock(|| -> u64 { panic!("global action failed") })
    }));
    assert!(res.is_err());
    run_in_thread(|| {
        let res = manager.run_with_lock_for(&user.id, || user.increment(), Duration::ZERO);
        assert_eq!(res, Ok(()));
        let res = manager.run_with_global_lock_for(|| user.increment(), Duration::ZERO);
        assert_eq!(res, Ok(()));
    });
    assert_eq!(user.score(), 2);
}

#[derive(Debug, PartialEq)]
enum JobError {
    Lock(LockError),
    Rejected,
}

impl From<LockError> for JobError {
    fn from(e: LockError) -> Self {
        JobError::Lock(e)
    }
}

#[test]
fn try_run_with_lock() {
    let manager = LockManager::<u64>::new();
    let user = User::new(1);
    let res = manager.try_run_with_lock(&user.id, || {
        user.increment();
        Ok::<_, JobError>(user.score())
    });
    assert_eq!(res, Ok(1));
    let res = manager.try_run_with_lock(&user.id, || Err::<(), _>(JobError::Rejected));
    assert_eq!(res, Err(JobError::Rejected));
    let res = manager.try_run_with_lock(None::<&u64>, || Ok::<_, JobError>(()));
    assert_eq!(res, Err(JobError::Lock(LockError::InvalidArgument)));
    run_in_thread(|| {
        let res = manager.run_with_lock_for(&user.id, || (), Duration::ZERO);
        assert_eq!(res, Ok(()));
    });
}

#[test]
fn try_run_with_global_lock() {
    let manager = LockManager::<u64>::new();
    let res = manager.try_run_with_global_lock(|| Err::<(), _>(JobError::Rejected));
    assert_eq!(res, Err(JobError::Rejected));
    let res = manager.try_run_with_global_lock(|| Ok::<_, JobError>(5));
    assert_eq!(res, Ok(5));
}

#[test]
fn configured_timeout() {
    let config = LockConfig::default().with_default_timeout(SHORT);
    let manager = LockManager::<u64>::with_config(config);
    assert_eq!(manager.config().default_timeout, SHORT);
    let user = User::new(1);
    let locked = Barrier::new(2);
    let release = Barrier::new(2);
    thread::scope(|s| {
        s.spawn(|| {
            manager
                .run_with_lock(&user.id, || {
                    locked.wait();
                    release.wait();
                })
                .unwrap();
        });
        locked.wait();
        let res = manager.run_with_lock(&user.id, || ());
        assert_eq!(res.map_err(|e| e.scope()), Err(Some(LockScope::Entity)));
        assert!(cancellation::take_cancelled());
        release.wait();
    });
}

#[test]
fn reclaiming_storage() {
    let storage = ReclaimingLockStorage::default();
    let manager = LockManager::<u64, _>::with_storage(storage, LockConfig::default());
    let users: Vec<User> = (0..50).map(User::new).collect();
    let next = AtomicUsize::new(0);
    run_pool(500, || {
        let user = &users[next.fetch_add(1, Relaxed) % users.len()];
        manager.run_with_lock(&user.id, || user.increment()).unwrap();
    });
    assert!(users.iter().all(|user| user.score() == 10));
    assert!(manager.storage().is_empty());
    manager
        .run_with_lock(&users[0].id, || {
            manager.run_with_lock(&users[0].id, || ()).unwrap();
            assert_eq!(manager.storage().len(), 1);
        })
        .unwrap();
    assert!(manager.storage().is_empty());
}
