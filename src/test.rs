use core::sync::atomic::Ordering::{Relaxed, SeqCst};

use crate::cfg::atomic::AtomicUsize;
use crate::cfg::sync::Arc;
use crate::locks::{Mutex, TwinsLock};
use crate::park::Park;

/// A trait for lock types that can be created in an unlocked state.
pub trait LockNew {
    /// Creates a new lock in an unlocked state ready for use.
    fn new() -> Self;
}

/// A trait for locks that block the caller until acquired.
pub trait Lock: LockNew {
    /// The maximum number of threads that may hold the lock at once.
    const HOLDERS: usize;

    /// Acquires the lock, blocking the current thread until it is able to do
    /// so.
    fn lock(&self);

    /// Releases the lock, panics if the release is rejected.
    fn unlock(&self);

    /// Returns `true` if some thread may be waiting to acquire the lock.
    fn has_queued_threads(&self) -> bool;
}

/// A trait for locks that can be tested without blocking.
pub trait TryLock: Lock {
    /// Attempts to acquire the lock without blocking.
    fn try_lock(&self) -> bool;
}

/// A trait for locks that support interruptible and timed acquisition.
#[cfg_attr(all(loom, test), allow(dead_code))]
pub trait TimedLock: TryLock {
    /// Acquires the lock unless the current thread is interrupted.
    fn lock_interruptibly(&self) -> Result<(), crate::Error>;

    /// Attempts to acquire the lock, waiting at most `timeout`.
    fn try_lock_for(&self, timeout: std::time::Duration) -> Result<bool, crate::Error>;
}

impl<P> LockNew for Mutex<P> {
    fn new() -> Self {
        Self::new()
    }
}

impl<P: Park> Lock for Mutex<P> {
    const HOLDERS: usize = 1;

    fn lock(&self) {
        self.lock();
    }

    fn unlock(&self) {
        self.unlock().unwrap();
    }

    fn has_queued_threads(&self) -> bool {
        self.has_queued_threads()
    }
}

impl<P: Park> TryLock for Mutex<P> {
    fn try_lock(&self) -> bool {
        self.try_lock()
    }
}

impl<P: Park> TimedLock for Mutex<P> {
    fn lock_interruptibly(&self) -> Result<(), crate::Error> {
        self.lock_interruptibly()
    }

    fn try_lock_for(&self, timeout: std::time::Duration) -> Result<bool, crate::Error> {
        self.try_lock_for(timeout)
    }
}

impl<P> LockNew for TwinsLock<P> {
    fn new() -> Self {
        Self::new()
    }
}

impl<P: Park> Lock for TwinsLock<P> {
    const HOLDERS: usize = 2;

    fn lock(&self) {
        self.lock();
    }

    fn unlock(&self) {
        self.unlock().unwrap();
    }

    fn has_queued_threads(&self) -> bool {
        self.has_queued_threads()
    }
}

impl<P: Park> TryLock for TwinsLock<P> {
    fn try_lock(&self) -> bool {
        self.try_lock()
    }
}

/// A lock paired with a counter that is only updated while the lock is held.
///
/// Entering the critical section checks that no more than `L::HOLDERS`
/// threads are inside it at once.
pub struct Probe<L> {
    lock: L,
    holders: AtomicUsize,
    count: AtomicUsize,
}

impl<L: Lock> Probe<L> {
    /// Creates a new probe around an unlocked lock.
    pub fn new() -> Self {
        Self { lock: L::new(), holders: AtomicUsize::new(0), count: AtomicUsize::new(0) }
    }

    /// Returns the protected lock.
    #[cfg_attr(all(loom, test), allow(dead_code))]
    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Runs the critical section, the lock must be held.
    fn enter(&self) {
        let holders = self.holders.fetch_add(1, SeqCst) + 1;
        assert!(holders <= L::HOLDERS, "{holders} threads hold the lock");
        if L::HOLDERS == 1 {
            // Lost updates would reveal a broken mutual exclusion.
            let count = self.count.load(Relaxed);
            self.count.store(count + 1, Relaxed);
        } else {
            self.count.fetch_add(1, Relaxed);
        }
        self.holders.fetch_sub(1, SeqCst);
    }
}

/// Get the number of completed critical sections.
pub fn get<L: Lock>(probe: &Arc<Probe<L>>) -> usize {
    probe.lock.lock();
    let count = probe.count.load(Relaxed);
    probe.lock.unlock();
    count
}

/// Runs one critical section.
pub fn inc<L: Lock>(probe: &Arc<Probe<L>>) {
    probe.lock.lock();
    probe.enter();
    probe.lock.unlock();
}

/// Runs one critical section if the lock can be acquired without blocking.
pub fn try_inc<L: TryLock>(probe: &Arc<Probe<L>>) {
    if probe.lock.try_lock() {
        probe.enter();
        probe.lock.unlock();
    }
}

#[cfg(all(not(loom), test))]
pub mod tests {
    // Modified test suite from the Rust's Mutex implementation with minor changes
    // since the API is not compatible with this crate implementation and some
    // new tests as well.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    use core::ops::RangeInclusive;
    use std::sync::mpsc::{self, channel};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{get, inc, try_inc};
    use super::{Lock, Probe, TimedLock, TryLock};
    use crate::context;
    use crate::error::Error;

    const ITERS: usize = 1000;
    const THREADS: usize = 4;
    const EXPECTED_VALUE: usize = ITERS * THREADS;
    const EXPECTED_RANGE: RangeInclusive<usize> = 1..=EXPECTED_VALUE;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn lock_inc_for<L: Lock, const END: usize>(probe: &Arc<Probe<L>>) {
        for _ in 0..END {
            inc(probe);
        }
    }

    fn try_lock_inc_for<L: TryLock, const END: usize>(probe: &Arc<Probe<L>>) {
        for _ in 0..END {
            try_inc(probe);
        }
    }

    fn mixed_lock_inc_for<L: TryLock, const END: usize>(probe: &Arc<Probe<L>>) {
        for r in 0..END {
            let f = if r % 2 == 0 { inc } else { try_inc };
            f(probe);
        }
    }

    fn lots_and_lots<L, const THREADS: usize>(f: fn(&Arc<Probe<L>>)) -> usize
    where
        L: Lock + Send + Sync + 'static,
    {
        init_logger();
        let probe = Arc::new(Probe::<L>::new());
        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let c_probe = Arc::clone(&probe);
            let c_tx = tx.clone();
            thread::spawn(move || {
                f(&c_probe);
                c_tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..THREADS {
            rx.recv().unwrap();
        }
        assert!(!probe.lock().has_queued_threads());
        get(&probe)
    }

    pub fn lots_and_lots_lock<L>()
    where
        L: Lock + Send + Sync + 'static,
    {
        let value = lots_and_lots::<L, THREADS>(lock_inc_for::<L, ITERS>);
        assert_eq!(value, EXPECTED_VALUE);
    }

    pub fn lots_and_lots_try_lock<L>()
    where
        L: TryLock + Send + Sync + 'static,
    {
        let value = lots_and_lots::<L, THREADS>(try_lock_inc_for::<L, ITERS>);
        assert!(EXPECTED_RANGE.contains(&value));
    }

    pub fn lots_and_lots_mixed_lock<L>()
    where
        L: TryLock + Send + Sync + 'static,
    {
        let value = lots_and_lots::<L, THREADS>(mixed_lock_inc_for::<L, ITERS>);
        assert!(EXPECTED_RANGE.contains(&value));
    }

    pub fn smoke<L: Lock>() {
        let lock = L::new();
        lock.lock();
        lock.unlock();
        lock.lock();
        lock.unlock();
    }

    pub fn test_acquire_more_than_one_lock<L>()
    where
        L: Lock + Send + Sync + 'static,
    {
        let arc = Arc::new(L::new());
        let mut threads = Vec::new();
        for _ in 0..4 {
            let c_arc = Arc::clone(&arc);
            let t = thread::spawn(move || {
                c_arc.lock();
                let lock = L::new();
                lock.lock();
                lock.unlock();
                c_arc.unlock();
            });
            threads.push(t);
        }
        for thread in threads {
            thread.join().unwrap();
        }
    }

    pub fn test_lock_arc_access_in_unwind<L>()
    where
        L: Lock + Send + Sync + 'static,
    {
        let arc = Arc::new(Probe::<L>::new());
        let arc2 = arc.clone();
        let _ = thread::spawn(move || {
            struct Unwinder<T: Lock> {
                i: Arc<Probe<T>>,
            }
            impl<T: Lock> Drop for Unwinder<T> {
                fn drop(&mut self) {
                    inc(&self.i);
                }
            }
            let _u = Unwinder { i: arc2 };
            panic!();
        })
        .join();
        inc(&arc);
        assert_eq!(get(&arc), 2);
    }

    /// Every blocked caller is eventually resumed, even when releases race
    /// with callers that are about to park.
    pub fn test_no_lost_wakeup<L>()
    where
        L: Lock + Send + Sync + 'static,
    {
        const ROUNDS: usize = 200;
        const WAITERS: usize = 3;
        init_logger();
        for _ in 0..ROUNDS {
            let probe = Arc::new(Probe::<L>::new());
            let (tx, rx) = mpsc::channel();
            for _ in 0..L::HOLDERS {
                probe.lock().lock();
            }
            let handles: Vec<_> = (0..WAITERS)
                .map(|_| {
                    let (probe, tx) = (Arc::clone(&probe), tx.clone());
                    thread::spawn(move || {
                        inc(&probe);
                        tx.send(()).unwrap();
                    })
                })
                .collect();
            thread::yield_now();
            for _ in 0..L::HOLDERS {
                probe.lock().unlock();
            }
            for _ in 0..WAITERS {
                rx.recv_timeout(Duration::from_secs(10)).expect("lost wakeup");
            }
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(get(&probe), WAITERS);
        }
    }

    /// A timed acquisition gives up once its timeout elapses, and its node
    /// does not hold back later callers.
    pub fn test_timed_out_acquire<L>()
    where
        L: TimedLock + Send + Sync + 'static,
    {
        let lock = Arc::new(L::new());
        lock.lock();
        let c_lock = Arc::clone(&lock);
        let timed = thread::spawn(move || {
            let start = Instant::now();
            let acquired = c_lock.try_lock_for(Duration::from_millis(30));
            (acquired, start.elapsed())
        });
        let (acquired, elapsed) = timed.join().unwrap();
        assert_eq!(acquired, Ok(false));
        assert!(elapsed >= Duration::from_millis(30));
        lock.unlock();
        assert_eq!(lock.try_lock_for(Duration::from_millis(30)), Ok(true));
        lock.unlock();
    }

    /// Interrupting a blocked caller makes it fail without acquiring.
    pub fn test_interrupted_acquire<L>()
    where
        L: TimedLock + Send + Sync + 'static,
    {
        let lock = Arc::new(L::new());
        let (tx, rx) = mpsc::channel();
        lock.lock();
        let c_lock = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            tx.send(context::current()).unwrap();
            c_lock.lock_interruptibly()
        });
        let ctx = rx.recv().unwrap();
        while !lock.has_queued_threads() {
            thread::yield_now();
        }
        ctx.interrupt();
        assert_eq!(handle.join().unwrap(), Err(Error::Interrupted));
        assert!(!ctx.is_interrupted());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    /// Cancelled nodes in the middle of the queue are skipped, the callers
    /// behind them still acquire in turn.
    pub fn test_cancellation_keeps_queue_live<L>()
    where
        L: TimedLock + Send + Sync + 'static,
    {
        const WAITERS: usize = 6;
        let probe = Arc::new(Probe::<L>::new());
        probe.lock().lock();
        let handles: Vec<_> = (0..WAITERS)
            .map(|n| {
                let probe = Arc::clone(&probe);
                thread::spawn(move || {
                    if n % 2 == 0 {
                        // Gives up while the lock is still held.
                        let timeout = Duration::from_millis(10);
                        assert_eq!(probe.lock().try_lock_for(timeout), Ok(false));
                    } else {
                        inc(&probe);
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        probe.lock().unlock();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(get(&probe), WAITERS / 2);
    }
}
