use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::SeqCst;
use std::time::{Duration, Instant};

use crate::cfg::atomic::AtomicU64;
use crate::condition::Condition;
use crate::context;
use crate::error::Error;
use crate::park::{Park, SpinThenPark};
use crate::state::{Int, State};
use crate::sync::{self, Exclusive, Synchronizer};

const UNLOCKED: Int = 0;
const LOCKED: Int = 1;

/// Context identifier of a lock without owner.
const NO_OWNER: u64 = 0;

/// The exclusive strategy of a [`Mutex`].
///
/// The state is `0` while unlocked and `1` while locked, and the context of
/// the locking thread is recorded as the owner.
pub struct Ownership {
    owner: AtomicU64,
}

impl Ownership {
    #[cfg(not(all(loom, test)))]
    const fn new() -> Self {
        Self { owner: AtomicU64::new(NO_OWNER) }
    }

    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    fn new() -> Self {
        Self { owner: AtomicU64::new(NO_OWNER) }
    }

    fn is_owner(&self) -> bool {
        self.owner.load(SeqCst) == context::current_id()
    }
}

impl Exclusive for Ownership {
    fn try_acquire(&self, state: &State, _: Int) -> bool {
        let acquired = state.compare_and_set(UNLOCKED, LOCKED);
        if acquired {
            self.owner.store(context::current_id(), SeqCst);
        }
        acquired
    }

    fn try_release(&self, state: &State, _: Int) -> Result<bool, Error> {
        if state.get() == UNLOCKED || !self.is_owner() {
            return Err(Error::NotOwner);
        }
        self.owner.store(NO_OWNER, SeqCst);
        if state.compare_and_set(LOCKED, UNLOCKED) {
            Ok(true)
        } else {
            Err(Error::NotOwner)
        }
    }

    fn is_held_exclusively(&self, state: &State) -> Result<bool, Error> {
        Ok(state.get() == LOCKED && self.is_owner())
    }
}

/// A mutual exclusion lock.
///
/// Only one thread may hold the lock at a time, other threads block in FIFO
/// order until it is released. The lock records its owner: only the thread
/// that locked it may unlock it or wait on its conditions.
///
/// The mutex does not protect any data by itself. Enable the `lock_api`
/// feature for a data guarding, RAII based front-end.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qsync::Mutex;
///
/// let mutex: Arc<Mutex> = Arc::new(Mutex::new());
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     c_mutex.lock();
///     assert!(c_mutex.is_locked());
///     c_mutex.unlock().unwrap();
/// })
/// .join()
/// .expect("thread::spawn failed");
///
/// assert!(!mutex.is_locked());
/// ```
pub struct Mutex<P = SpinThenPark> {
    sync: Synchronizer<Ownership, P>,
}

impl<P> Mutex<P> {
    /// Creates a new, unlocked mutex.
    ///
    /// # Examples
    ///
    /// ```
    /// use qsync::Mutex;
    ///
    /// static MUTEX: Mutex = Mutex::new();
    /// assert!(!MUTEX.is_locked());
    /// ```
    #[cfg(not(all(loom, test)))]
    #[must_use]
    pub const fn new() -> Self {
        Self { sync: Synchronizer::new(Ownership::new(), UNLOCKED) }
    }

    /// Creates a new, unlocked mutex with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self { sync: Synchronizer::new(Ownership::new(), UNLOCKED) }
    }

    /// Returns `true` if the lock is currently held, by any thread.
    ///
    /// This method does not provide any synchronization guarantees, so it's
    /// only useful as a heuristic, and so must be considered not up to date.
    pub fn is_locked(&self) -> bool {
        self.sync.state().get() == LOCKED
    }

    /// Returns `true` if the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.is_locked() && self.sync.strategy().is_owner()
    }

    /// Returns `true` if some thread may be waiting to acquire the lock.
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }
}

impl<P: Park> Mutex<P> {
    /// Acquires the lock, blocking the current thread until it is able to do
    /// so. Interrupts are ignored.
    pub fn lock(&self) {
        self.sync.acquire(LOCKED);
    }

    /// Acquires the lock unless the current thread is interrupted.
    ///
    /// # Examples
    ///
    /// ```
    /// use qsync::{context, Error, Mutex};
    ///
    /// let mutex: Mutex = Mutex::new();
    /// context::current().interrupt();
    /// assert_eq!(mutex.lock_interruptibly(), Err(Error::Interrupted));
    /// assert_eq!(mutex.lock_interruptibly(), Ok(()));
    /// mutex.unlock().unwrap();
    /// ```
    pub fn lock_interruptibly(&self) -> Result<(), Error> {
        self.sync.acquire_interruptibly(LOCKED)
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// A free lock is acquired even if other threads are queued for it.
    pub fn try_lock(&self) -> bool {
        self.sync.try_acquire(LOCKED)
    }

    /// Attempts to acquire the lock, waiting at most `timeout`.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first, and fails with
    /// [`Error::Interrupted`] if the current thread is interrupted.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    /// use std::time::Duration;
    ///
    /// use qsync::Mutex;
    ///
    /// let mutex: Mutex = Mutex::new();
    /// mutex.lock();
    /// thread::scope(|s| {
    ///     let acquired = s.spawn(|| mutex.try_lock_for(Duration::from_millis(5)));
    ///     assert_eq!(acquired.join().unwrap(), Ok(false));
    /// });
    /// mutex.unlock().unwrap();
    /// ```
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, Error> {
        match sync::deadline_after(timeout) {
            Some(deadline) => self.try_lock_until(deadline),
            None => self.lock_interruptibly().map(|()| true),
        }
    }

    /// Attempts to acquire the lock, waiting until `deadline` at most.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<bool, Error> {
        self.sync.try_acquire_until(LOCKED, deadline)
    }

    /// Releases the lock, resuming the next queued thread.
    ///
    /// Fails with [`Error::NotOwner`] if the lock is not held by the calling
    /// thread.
    pub fn unlock(&self) -> Result<(), Error> {
        self.sync.release(LOCKED).map(drop)
    }

    /// Creates a new condition bound to this lock.
    pub fn new_condition(&self) -> Condition<'_, Ownership, P> {
        Condition::new(&self.sync)
    }

    #[cfg_attr(not(feature = "lock_api"), allow(dead_code))]
    pub(crate) fn try_lock_until_uninterruptibly(&self, deadline: Instant) -> bool {
        self.sync.try_acquire_until_uninterruptibly(LOCKED, deadline)
    }
}

impl<P> Default for Mutex<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Debug for Mutex<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        d.field("locked", &self.is_locked());
        d.field("queued", &self.has_queued_threads());
        d.finish()
    }
}

#[cfg(all(feature = "lock_api", not(all(loom, test))))]
unsafe impl<P: Park> lock_api::RawMutex for Mutex<P> {
    // The guard unlocks from the owning context only.
    type GuardMarker = lock_api::GuardNoSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    #[inline]
    fn lock(&self) {
        Self::lock(self);
    }

    #[inline]
    fn try_lock(&self) -> bool {
        Self::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        let released = Self::unlock(self);
        debug_assert_eq!(released, Ok(()));
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Self::is_locked(self)
    }
}

#[cfg(all(feature = "lock_api", not(all(loom, test))))]
unsafe impl<P: Park> lock_api::RawMutexTimed for Mutex<P> {
    type Duration = Duration;
    type Instant = Instant;

    fn try_lock_for(&self, timeout: Duration) -> bool {
        match sync::deadline_after(timeout) {
            Some(deadline) => self.try_lock_until_uninterruptibly(deadline),
            None => {
                Self::lock(self);
                true
            }
        }
    }

    fn try_lock_until(&self, deadline: Instant) -> bool {
        self.try_lock_until_uninterruptibly(deadline)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::context;
    use crate::error::Error;
    use crate::park::{ImmediatePark, LoopThenPark, SpinBackoffThenPark, SpinThenPark, YieldThenPark};
    use crate::test::tests;

    type Mutex = super::Mutex<ImmediatePark>;

    #[test]
    fn smoke() {
        tests::smoke::<Mutex>();
    }

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<super::Mutex<SpinThenPark>>();
        tests::lots_and_lots_lock::<super::Mutex<YieldThenPark>>();
        tests::lots_and_lots_lock::<super::Mutex<LoopThenPark>>();
        tests::lots_and_lots_lock::<super::Mutex<SpinBackoffThenPark>>();
        tests::lots_and_lots_lock::<Mutex>();
    }

    #[test]
    fn lots_and_lots_try_lock() {
        tests::lots_and_lots_try_lock::<Mutex>();
    }

    #[test]
    fn lots_and_lots_mixed_lock() {
        tests::lots_and_lots_mixed_lock::<Mutex>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Mutex>();
    }

    #[test]
    fn test_acquire_more_than_one_lock() {
        tests::test_acquire_more_than_one_lock::<Mutex>();
    }

    #[test]
    fn test_no_lost_wakeup() {
        tests::test_no_lost_wakeup::<Mutex>();
    }

    #[test]
    fn test_timed_out_acquire() {
        tests::test_timed_out_acquire::<Mutex>();
    }

    #[test]
    fn test_interrupted_acquire() {
        tests::test_interrupted_acquire::<Mutex>();
    }

    #[test]
    fn test_cancellation_keeps_queue_live() {
        tests::test_cancellation_keeps_queue_live::<Mutex>();
    }

    #[test]
    fn unlock_requires_ownership() {
        let mutex = Mutex::new();
        assert_eq!(mutex.unlock(), Err(Error::NotOwner));
        mutex.lock();
        thread::scope(|s| {
            let other = s.spawn(|| mutex.unlock());
            assert_eq!(other.join().unwrap(), Err(Error::NotOwner));
        });
        assert!(mutex.is_held_by_current_thread());
        assert_eq!(mutex.unlock(), Ok(()));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn try_lock_barges_ahead_of_nobody() {
        let mutex = Mutex::new();
        assert!(mutex.try_lock());
        assert!(!mutex.try_lock());
        mutex.unlock().unwrap();
        assert!(!mutex.has_queued_threads());
    }

    #[test]
    fn try_lock_for_returns_after_timeout() {
        let mutex = Mutex::new();
        mutex.lock();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let start = Instant::now();
                let acquired = mutex.try_lock_for(Duration::from_millis(50));
                (acquired, start.elapsed())
            });
            let (acquired, elapsed) = waiter.join().unwrap();
            assert_eq!(acquired, Ok(false));
            assert!(elapsed >= Duration::from_millis(50));
        });
        assert!(!mutex.has_queued_threads());
        mutex.unlock().unwrap();
    }

    #[test]
    fn try_lock_for_acquires_once_released() {
        let mutex = Mutex::new();
        mutex.lock();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let acquired = mutex.try_lock_for(Duration::from_secs(10));
                let held = mutex.is_held_by_current_thread();
                mutex.unlock().unwrap();
                (acquired, held)
            });
            while !mutex.has_queued_threads() {
                thread::yield_now();
            }
            mutex.unlock().unwrap();
            assert_eq!(waiter.join().unwrap(), (Ok(true), true));
        });
    }

    #[test]
    fn lock_ignores_interrupts() {
        let mutex = Mutex::new();
        let (tx, rx) = mpsc::channel();
        mutex.lock();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                tx.send(context::current()).unwrap();
                mutex.lock();
                mutex.unlock().unwrap();
                context::interrupted()
            });
            let ctx = rx.recv().unwrap();
            while !mutex.has_queued_threads() {
                thread::yield_now();
            }
            ctx.interrupt();
            mutex.unlock().unwrap();
            // The interrupt is left pending for the waiter to observe.
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn condition_restores_ownership() {
        let mutex = Mutex::new();
        mutex.lock();
        let cond = mutex.new_condition();
        assert_eq!(cond.wait_timeout(Duration::from_millis(1)), Ok(false));
        assert!(mutex.is_held_by_current_thread());
        mutex.unlock().unwrap();
    }

    #[test]
    fn debug() {
        let mutex = Mutex::new();
        assert_eq!(format!("{mutex:?}"), "Mutex { locked: false, queued: false }");
        mutex.lock();
        assert_eq!(format!("{mutex:?}"), "Mutex { locked: true, queued: false }");
        mutex.unlock().unwrap();
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;
    use crate::park::ImmediatePark;
    use crate::relax::Yield;

    type Mutex = super::Mutex<ImmediatePark<Yield>>;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex>();
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join::<Mutex>();
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join::<Mutex>();
    }
}
