use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use qsync::{context, Error, Mutex, TwinsLock};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn twins_lock_admits_two_of_three() {
    init_logger();
    let lock: Arc<TwinsLock> = Arc::new(TwinsLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let (lock, inside, tx) = (Arc::clone(&lock), Arc::clone(&inside), tx.clone());
            thread::spawn(move || {
                lock.lock();
                inside.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })
        })
        .collect();

    rx.recv().unwrap();
    rx.recv().unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(inside.load(Ordering::SeqCst), 2);
    assert_eq!(lock.available_permits(), 0);

    lock.unlock().unwrap();
    rx.recv().unwrap();
    assert_eq!(inside.load(Ordering::SeqCst), 3);

    for handle in handles {
        handle.join().unwrap();
    }
    lock.unlock().unwrap();
    lock.unlock().unwrap();
    assert_eq!(lock.available_permits(), <TwinsLock>::PERMITS);
}

#[test]
fn mutex_timed_lock_gives_up() {
    init_logger();
    let mutex: Mutex = Mutex::new();
    mutex.lock();
    thread::scope(|s| {
        let handle = s.spawn(|| {
            let start = Instant::now();
            let acquired = mutex.try_lock_for(Duration::from_millis(50));
            (acquired, start.elapsed())
        });
        let (acquired, elapsed) = handle.join().unwrap();
        assert_eq!(acquired, Ok(false));
        assert!(elapsed >= Duration::from_millis(50));
    });
    assert!(!mutex.has_queued_threads());
    mutex.unlock().unwrap();
}

#[test]
fn condition_wait_releases_and_restores_lock() {
    init_logger();
    let mutex: Mutex = Mutex::new();
    let cond = mutex.new_condition();
    let ready = AtomicUsize::new(0);

    thread::scope(|s| {
        mutex.lock();
        let handle = s.spawn(|| {
            mutex.lock();
            ready.store(1, Ordering::SeqCst);
            cond.signal().unwrap();
            mutex.unlock().unwrap();
        });
        while ready.load(Ordering::SeqCst) == 0 {
            cond.wait().unwrap();
        }
        assert!(mutex.is_held_by_current_thread());
        mutex.unlock().unwrap();
        handle.join().unwrap();
    });
    assert!(!mutex.is_locked());
}

#[test]
fn interrupt_cancels_blocked_lock() {
    init_logger();
    let mutex: Mutex = Mutex::new();
    mutex.lock();
    let mutex = &mutex;
    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let handle = s.spawn(move || {
            tx.send(context::current()).unwrap();
            mutex.lock_interruptibly()
        });
        let ctx = rx.recv().unwrap();
        while !mutex.has_queued_threads() {
            thread::yield_now();
        }
        ctx.interrupt();
        assert_eq!(handle.join().unwrap(), Err(Error::Interrupted));
    });
    mutex.unlock().unwrap();
    assert!(mutex.try_lock());
    mutex.unlock().unwrap();
}
