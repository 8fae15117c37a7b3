//! Integration tests for lock contention.
//!
//! These tests hammer the shared/exclusive lock and the monitor-based
//! primitives from several threads and check that nothing deadlocks and
//! that acquisitions stay balanced.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strand_sync::{
    BoundedSemaphore, Event, Monitor, RawLock, ReentrantLock, SharedExclusiveLock,
};

#[test]
fn test_shlock_random_modes_do_not_deadlock() {
    let lock = Arc::new(SharedExclusiveLock::with_name("stress"));
    let writers_inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let deadline = Instant::now() + Duration::from_secs(30);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let writers_inside = Arc::clone(&writers_inside);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..1000 {
                    assert!(Instant::now() < deadline, "stress test stalled");
                    let shared = rng.gen_bool(0.5);
                    assert!(lock.acquire(shared, true, None));
                    assert!(lock.acquire(shared, true, None));
                    lock.release().unwrap();
                    assert!(lock.acquire(shared, true, None));
                    if !shared {
                        assert_eq!(writers_inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(lock.reader_count(), 0);
                        writers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                    lock.release().unwrap();
                    lock.release().unwrap();
                }
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(lock.reader_count(), 0);
    assert!(!lock.is_exclusively_held());
}

#[test]
fn test_nested_shlock_acquisitions_balance() {
    let lock = Arc::new(SharedExclusiveLock::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    let _outer = lock.write();
                    let depth = rng.gen_range(1..4);
                    for _ in 0..depth {
                        assert!(lock.acquire(rng.gen_bool(0.5), false, None));
                    }
                    for _ in 0..depth {
                        lock.release().unwrap();
                    }
                    assert_eq!(lock.current_depths(), (0, 1));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!lock.is_exclusively_held());
}

#[test]
fn test_producer_consumer_over_monitor() {
    let monitor = Arc::new(Monitor::new());
    let queue = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let consumer = {
        let monitor = Arc::clone(&monitor);
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut received = Vec::new();
            let _guard = monitor.lock();
            while received.len() < 50 {
                let ready = monitor
                    .wait_for(|| !queue.lock().is_empty(), Some(Duration::from_secs(10)))
                    .unwrap();
                assert!(ready);
                received.append(&mut queue.lock());
            }
            received
        })
    };

    for item in 0..50 {
        let _guard = monitor.lock();
        queue.lock().push(item);
        monitor.notify().unwrap();
    }

    let received = consumer.join().unwrap();
    assert_eq!(received, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_monitor_over_shared_lock_handle() {
    let lock = Arc::new(ReentrantLock::with_name("shared"));
    let monitor = Arc::new(Monitor::with_lock(Arc::clone(&lock)));
    let gate = Arc::new(Event::new());

    let waiter = {
        let monitor = Arc::clone(&monitor);
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            let _guard = monitor.lock();
            gate.set();
            monitor.wait(Some(Duration::from_secs(5))).unwrap()
        })
    };

    assert!(gate.wait(Some(Duration::from_secs(5))));
    // The waiter released the shared lock while waiting.
    let held = lock.lock();
    monitor.notify_all().unwrap();
    drop(held);
    assert!(waiter.join().unwrap());
}

#[test]
fn test_bounded_semaphore_as_pool() {
    let pool = Arc::new(BoundedSemaphore::new(3));
    let in_use = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                for _ in 0..20 {
                    assert!(pool.acquire(true, Some(Duration::from_secs(10))));
                    assert!(in_use.fetch_add(1, Ordering::SeqCst) < 3);
                    in_use.fetch_sub(1, Ordering::SeqCst);
                    pool.release().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.value(), 3);
    assert!(pool.release().is_err());
}
