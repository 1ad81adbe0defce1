//! Condition variables bound to an exclusively held synchronizer.
//!
//! A caller holding the synchronizer may wait on a [`Condition`]: it fully
//! releases the synchronizer, sleeps until another holder signals it, then
//! reacquires the synchronizer with the exact state it released before
//! returning. Signalling moves the longest waiting caller from the condition
//! over to the synchronizer's wait queue, where it competes for the state
//! again like any other queued caller.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::thread;
//!
//! use qsync::Mutex;
//!
//! let mutex: Mutex = Mutex::new();
//! let cond = mutex.new_condition();
//! let ready = AtomicBool::new(false);
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         mutex.lock();
//!         ready.store(true, Ordering::SeqCst);
//!         cond.signal().unwrap();
//!         mutex.unlock().unwrap();
//!     });
//!
//!     mutex.lock();
//!     while !ready.load(Ordering::SeqCst) {
//!         cond.wait().unwrap();
//!     }
//!     mutex.unlock().unwrap();
//! });
//! ```

use core::fmt::{self, Debug, Formatter};
use core::ptr;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release, SeqCst};
use std::collections::VecDeque;
use std::mem;
use std::time::{Duration, Instant};

use log::debug;

use crate::cfg::atomic::{AtomicBool, AtomicU8};
use crate::cfg::cell::{UnsafeCell, WithMutUnchecked};
use crate::cfg::sync::Arc;
use crate::context;
use crate::error::Error;
use crate::park::{Park, SpinThenPark};
use crate::parker::{Parker, ParkerT, Wake};
use crate::queue::{Mode, Node};
use crate::relax::Relax;
use crate::sync::{self, Exclusive, Synchronizer, Wait, SPIN_FOR_TIMEOUT_THRESHOLD};

const WAITING: u8 = 0;
const SIGNALED: u8 = 1;
const TRANSFERRED: u8 = 2;
const CANCELLED: u8 = 3;

/// A caller blocked on a condition.
///
/// The status moves from `WAITING` to either `CANCELLED`, when the waiter
/// gives up on its own, or `SIGNALED` then `TRANSFERRED`, when a signaller
/// links its node into the synchronizer's queue. Whoever wins the exchange
/// out of `WAITING` enqueues the node.
struct Waiter {
    status: AtomicU8,
    node: *mut Node,
}

// SAFETY: The node pointer is only handed over to the wait queue by the one
// thread that wins the status exchange.
unsafe impl Send for Waiter {}
unsafe impl Sync for Waiter {}

impl Waiter {
    fn new(node: *mut Node) -> Self {
        Self { status: AtomicU8::new(WAITING), node }
    }

    fn status(&self) -> u8 {
        self.status.load(SeqCst)
    }

    /// The waiting thread parks on the waiter's own address.
    fn key(&self) -> usize {
        self as *const Self as usize
    }
}

/// A condition variable bound to a [`Synchronizer`] held in exclusive mode.
///
/// Conditions are created by [`Synchronizer::new_condition`] or
/// [`Mutex::new_condition`]. All operations require the calling thread to
/// hold the synchronizer, as reported by [`Exclusive::is_held_exclusively`],
/// and fail with [`Error::NotOwner`] otherwise.
///
/// Waiters are signalled in FIFO order.
///
/// [`Mutex::new_condition`]: crate::Mutex::new_condition
pub struct Condition<'a, S, P = SpinThenPark> {
    sync: &'a Synchronizer<S, P>,
    waiters: UnsafeCell<VecDeque<Arc<Waiter>>>,
    busy: AtomicBool,
}

// SAFETY: The waiter list is only accessed while `busy` is held.
unsafe impl<S: Sync, P> Sync for Condition<'_, S, P> {}

/// Releases the waiter list guard on drop.
struct Unlock<'a>(&'a AtomicBool);

impl Drop for Unlock<'_> {
    fn drop(&mut self) {
        self.0.store(false, Release);
    }
}

impl<'a, S, P> Condition<'a, S, P> {
    pub(crate) fn new(sync: &'a Synchronizer<S, P>) -> Self {
        let waiters = UnsafeCell::new(VecDeque::new());
        Self { sync, waiters, busy: AtomicBool::new(false) }
    }
}

impl<S: Exclusive, P: Park> Condition<'_, S, P> {
    /// Waits until signalled or interrupted.
    ///
    /// The synchronizer is fully released while waiting and reacquired with
    /// the same state before returning, whatever the outcome. Fails with
    /// [`Error::Interrupted`] if the calling thread was interrupted before or
    /// while waiting. An interrupt that arrives after the signal is left
    /// pending.
    pub fn wait(&self) -> Result<(), Error> {
        self.wait_inner(Wait::INTERRUPTIBLY).map(drop)
    }

    /// Waits until signalled, ignoring interrupts.
    pub fn wait_uninterruptibly(&self) -> Result<(), Error> {
        self.wait_inner(Wait::UNINTERRUPTIBLY).map(drop)
    }

    /// Waits until signalled, interrupted or until `timeout` elapses.
    ///
    /// Returns `Ok(false)` if the timeout elapsed before a signal arrived.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, Error> {
        self.wait_inner(Wait::until(sync::deadline_after(timeout)))
    }

    /// Waits until signalled, interrupted or until `deadline` is reached.
    ///
    /// Returns `Ok(false)` if the deadline passed before a signal arrived.
    pub fn wait_until(&self, deadline: Instant) -> Result<bool, Error> {
        self.wait_inner(Wait::until(Some(deadline)))
    }

    /// Moves the longest waiting caller, if any, to the synchronizer's queue.
    pub fn signal(&self) -> Result<(), Error> {
        self.check_held()?;
        while let Some(waiter) = self.with_waiters(VecDeque::pop_front) {
            if self.transfer(&waiter) {
                break;
            }
        }
        Ok(())
    }

    /// Moves every waiting caller to the synchronizer's queue, in order.
    pub fn signal_all(&self) -> Result<(), Error> {
        self.check_held()?;
        for waiter in self.with_waiters(mem::take) {
            self.transfer(&waiter);
        }
        Ok(())
    }

    /// Returns `true` if some caller is waiting on this condition.
    pub fn has_waiters(&self) -> Result<bool, Error> {
        self.check_held()?;
        Ok(self.with_waiters(|waiters| waiters.iter().any(|w| w.status() == WAITING)))
    }

    fn wait_inner(&self, wait: Wait) -> Result<bool, Error> {
        if wait.interruptible && context::interrupted() {
            return Err(Error::Interrupted);
        }
        self.check_held()?;
        let waiter = Arc::new(Waiter::new(Node::alloc(Mode::Exclusive)));
        self.with_waiters(|waiters| waiters.push_back(Arc::clone(&waiter)));
        let saved = self.sync.state().get();
        match self.sync.release(saved) {
            Ok(true) => {}
            released => {
                self.remove(&waiter);
                // SAFETY: The caller still holds the synchronizer, so no one
                // could signal the node into the queue.
                unsafe { Node::free(waiter.node) };
                return Err(released.err().unwrap_or(Error::NotOwner));
            }
        }

        let ctx = context::current();
        let key = waiter.key();
        let mut relax = P::Relax::new();
        let mut interrupted = false;
        let mut timed_out = false;
        let mut wake = Wake::Unparked;
        loop {
            match waiter.status() {
                TRANSFERRED => break,
                SIGNALED => {
                    // The signaller is linking the node, it unparks us once done.
                    let validate = || waiter.status() == SIGNALED;
                    // SAFETY: `validate` only runs an atomic load.
                    unsafe { ctx.park(key, false, validate, None) };
                }
                _ => {
                    if wait.interruptible && ctx.is_interrupted() {
                        if self.cancel(&waiter) {
                            interrupted = true;
                            break;
                        }
                        continue;
                    }
                    let Some(left) = wait.remaining(wake) else {
                        if self.cancel(&waiter) {
                            timed_out = true;
                            break;
                        }
                        continue;
                    };
                    if matches!(left, Some(left) if left < SPIN_FOR_TIMEOUT_THRESHOLD) {
                        relax.relax();
                        continue;
                    }
                    let validate = || waiter.status() == WAITING;
                    // SAFETY: `validate` only runs an atomic load.
                    wake = unsafe { ctx.park(key, wait.interruptible, validate, wait.deadline) };
                }
            }
        }

        // SAFETY: The node was linked by us or by a signaller, and only this
        // thread drives it.
        unsafe { self.sync.reacquire(waiter.node, saved) };
        if interrupted || timed_out {
            self.remove(&waiter);
        }
        if interrupted {
            ctx.take_interrupt();
            return Err(Error::Interrupted);
        }
        Ok(!timed_out)
    }

    /// Hands the waiter's node over to the synchronizer's queue, unless the
    /// waiter gave up first.
    fn transfer(&self, waiter: &Waiter) -> bool {
        if waiter.status.compare_exchange(WAITING, SIGNALED, SeqCst, SeqCst).is_err() {
            return false;
        }
        // SAFETY: Winning the exchange hands the node over to us.
        unsafe { self.sync.queue().enqueue(waiter.node) };
        waiter.status.store(TRANSFERRED, SeqCst);
        debug!("transferred condition waiter {:p} to the wait queue", waiter.node);
        Parker::unpark_all(waiter.key());
        true
    }

    /// Gives up waiting, linking the node into the synchronizer's queue so
    /// that it can be reacquired. Returns `false` if a signal came first.
    fn cancel(&self, waiter: &Waiter) -> bool {
        if waiter.status.compare_exchange(WAITING, CANCELLED, SeqCst, SeqCst).is_err() {
            return false;
        }
        // SAFETY: Winning the exchange keeps the node to ourselves.
        unsafe { self.sync.queue().enqueue(waiter.node) };
        true
    }

    fn remove(&self, waiter: &Arc<Waiter>) {
        let target: &Waiter = waiter;
        self.with_waiters(|waiters| waiters.retain(|w| !ptr::eq(&**w, target)));
    }

    fn check_held(&self) -> Result<(), Error> {
        if self.sync.is_held_exclusively()? {
            Ok(())
        } else {
            Err(Error::NotOwner)
        }
    }

    /// Runs `f` against the waiter list under the list guard.
    fn with_waiters<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut VecDeque<Arc<Waiter>>) -> Ret,
    {
        let mut relax = P::Relax::new();
        while self.busy.compare_exchange_weak(false, true, Acquire, Relaxed).is_err() {
            relax.relax();
        }
        let _unlock = Unlock(&self.busy);
        // SAFETY: Holding `busy` grants exclusive access to the list.
        unsafe { self.waiters.with_mut_unchecked(f) }
    }
}

impl<S, P> Debug for Condition<'_, S, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").field("sync", self.sync).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::context;
    use crate::error::Error;
    use crate::locks::Mutex;
    use crate::park::ImmediatePark;

    type TestMutex = Mutex<ImmediatePark>;

    #[test]
    fn operations_require_ownership() {
        let mutex = TestMutex::new();
        let cond = mutex.new_condition();
        assert_eq!(cond.wait(), Err(Error::NotOwner));
        assert_eq!(cond.wait_timeout(Duration::from_millis(1)), Err(Error::NotOwner));
        assert_eq!(cond.signal(), Err(Error::NotOwner));
        assert_eq!(cond.signal_all(), Err(Error::NotOwner));
        assert_eq!(cond.has_waiters(), Err(Error::NotOwner));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn timed_wait_releases_and_restores() {
        let mutex = TestMutex::new();
        mutex.lock();
        let cond = mutex.new_condition();
        let start = Instant::now();
        assert_eq!(cond.wait_timeout(Duration::from_millis(20)), Ok(false));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(mutex.is_held_by_current_thread());
        assert_eq!(cond.has_waiters(), Ok(false));
        mutex.unlock().unwrap();
    }

    #[test]
    fn zero_timeout_still_reacquires() {
        let mutex = TestMutex::new();
        mutex.lock();
        let cond = mutex.new_condition();
        assert_eq!(cond.wait_timeout(Duration::ZERO), Ok(false));
        assert!(mutex.is_held_by_current_thread());
        mutex.unlock().unwrap();
    }

    #[test]
    fn signal_wakes_waiters_in_order() {
        const WAITERS: usize = 4;
        let mutex = TestMutex::new();
        let cond = mutex.new_condition();
        let woken = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            for id in 0..WAITERS {
                let (mutex, cond, woken, tx) = (&mutex, &cond, &woken, tx.clone());
                s.spawn(move || {
                    mutex.lock();
                    woken.fetch_add(1, Ordering::SeqCst);
                    cond.wait().unwrap();
                    tx.send(id).unwrap();
                    mutex.unlock().unwrap();
                });
                // Wait for each thread to be parked on the condition before
                // starting the next one, so that the waiting order is known.
                while woken.load(Ordering::SeqCst) != id + 1 || mutex.is_locked() {
                    thread::yield_now();
                }
            }
            for id in 0..WAITERS {
                mutex.lock();
                assert_eq!(cond.has_waiters(), Ok(true));
                cond.signal().unwrap();
                mutex.unlock().unwrap();
                assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok(id));
            }
            mutex.lock();
            assert_eq!(cond.has_waiters(), Ok(false));
            mutex.unlock().unwrap();
        });
    }

    #[test]
    fn signal_all_wakes_everyone() {
        const WAITERS: usize = 5;
        let mutex = TestMutex::new();
        let cond = mutex.new_condition();
        let waiting = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..WAITERS {
                s.spawn(|| {
                    mutex.lock();
                    waiting.fetch_add(1, Ordering::SeqCst);
                    cond.wait_uninterruptibly().unwrap();
                    waiting.fetch_sub(1, Ordering::SeqCst);
                    mutex.unlock().unwrap();
                });
            }
            loop {
                mutex.lock();
                let parked = waiting.load(Ordering::SeqCst) == WAITERS;
                if parked {
                    cond.signal_all().unwrap();
                }
                mutex.unlock().unwrap();
                if parked {
                    break;
                }
                thread::yield_now();
            }
        });
        assert_eq!(waiting.load(Ordering::SeqCst), 0);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn interrupted_wait_reacquires_before_failing() {
        let mutex = Arc::new(TestMutex::new());
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn({
            let mutex = Arc::clone(&mutex);
            move || {
                mutex.lock();
                tx.send(context::current()).unwrap();
                let cond = mutex.new_condition();
                let result = cond.wait();
                let held = mutex.is_held_by_current_thread();
                mutex.unlock().unwrap();
                (result, held)
            }
        });
        let ctx = rx.recv().unwrap();
        // The waiter released the mutex once it is parked on the condition.
        mutex.lock();
        ctx.interrupt();
        mutex.unlock().unwrap();
        assert_eq!(handle.join().unwrap(), (Err(Error::Interrupted), true));
    }

    #[test]
    fn pending_interrupt_fails_before_releasing() {
        let mutex = TestMutex::new();
        mutex.lock();
        let cond = mutex.new_condition();
        context::current().interrupt();
        assert_eq!(cond.wait(), Err(Error::Interrupted));
        assert!(mutex.is_held_by_current_thread());
        mutex.unlock().unwrap();
    }
}
