use core::fmt::{self, Debug, Formatter};

use crate::error::Error;
use crate::park::{Park, SpinThenPark};
use crate::state::{Int, State};
use crate::sync::{Shared, Synchronizer};

/// The shared strategy of a [`TwinsLock`].
///
/// The state counts the permits that are still available. Acquiring takes
/// permits away and fails when not enough are left, releasing gives them
/// back.
pub struct Permits {
    max: Int,
}

impl Shared for Permits {
    fn try_acquire_shared(&self, state: &State, arg: Int) -> Int {
        loop {
            let current = state.get();
            let Some(remaining) = current.checked_sub(arg).filter(|&r| r >= 0) else {
                return -1;
            };
            if state.compare_and_set(current, remaining) {
                return remaining;
            }
        }
    }

    fn try_release_shared(&self, state: &State, arg: Int) -> Result<bool, Error> {
        loop {
            let current = state.get();
            let Some(updated) = current.checked_add(arg).filter(|&u| u <= self.max) else {
                return Err(Error::NotOwner);
            };
            if state.compare_and_set(current, updated) {
                return Ok(true);
            }
        }
    }
}

/// A shared lock that admits a bounded number of holders at a time.
///
/// By default at most two threads hold the lock at once, further callers
/// block in FIFO order until a holder unlocks. Holders are not tracked, any
/// thread may give a permit back as long as one is out.
///
/// # Examples
///
/// ```
/// use qsync::TwinsLock;
///
/// let lock: TwinsLock = TwinsLock::new();
/// lock.lock();
/// lock.lock();
/// assert_eq!(lock.available_permits(), 0);
/// lock.unlock().unwrap();
/// lock.unlock().unwrap();
/// assert!(lock.unlock().is_err());
/// ```
pub struct TwinsLock<P = SpinThenPark> {
    sync: Synchronizer<Permits, P>,
}

impl<P> TwinsLock<P> {
    /// The number of permits of a lock created with [`new`].
    ///
    /// [`new`]: TwinsLock::new
    pub const PERMITS: Int = 2;

    /// Creates a new lock with two permits.
    #[cfg(not(all(loom, test)))]
    #[must_use]
    pub const fn new() -> Self {
        let permits = Permits { max: Self::PERMITS };
        Self { sync: Synchronizer::new(permits, Self::PERMITS) }
    }

    /// Creates a new lock with two permits with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        let permits = Permits { max: Self::PERMITS };
        Self { sync: Synchronizer::new(permits, Self::PERMITS) }
    }

    /// Creates a new lock that admits at most `permits` holders.
    ///
    /// Fails with [`Error::InvalidArgument`] if `permits` is not positive.
    ///
    /// # Examples
    ///
    /// ```
    /// use qsync::{Error, TwinsLock};
    ///
    /// let lock: TwinsLock = TwinsLock::with_permits(3).unwrap();
    /// assert_eq!(lock.available_permits(), 3);
    ///
    /// let invalid: Result<TwinsLock, Error> = TwinsLock::with_permits(0);
    /// assert!(matches!(invalid, Err(Error::InvalidArgument(_))));
    /// ```
    pub fn with_permits(permits: Int) -> Result<Self, Error> {
        if permits <= 0 {
            return Err(Error::InvalidArgument("permit count must be positive"));
        }
        let strategy = Permits { max: permits };
        Ok(Self { sync: Synchronizer::new(strategy, permits) })
    }

    /// Returns the number of permits currently available.
    pub fn available_permits(&self) -> Int {
        self.sync.state().get()
    }

    /// Returns `true` if some thread may be waiting to acquire the lock.
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }
}

impl<P: Park> TwinsLock<P> {
    /// Takes a permit, blocking the current thread until one is available.
    pub fn lock(&self) {
        self.sync.acquire_shared(1);
    }

    /// Gives a permit back, resuming queued threads that can now proceed.
    ///
    /// Fails with [`Error::NotOwner`] if every permit is already available.
    pub fn unlock(&self) -> Result<(), Error> {
        self.sync.release_shared(1).map(drop)
    }

    #[cfg(test)]
    pub(crate) fn try_lock(&self) -> bool {
        self.sync.try_acquire_shared(1)
    }
}

impl<P> Default for TwinsLock<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Debug for TwinsLock<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("TwinsLock");
        d.field("available", &self.available_permits());
        d.field("queued", &self.has_queued_threads());
        d.finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use crate::error::Error;
    use crate::park::{ImmediatePark, SpinThenPark, YieldThenPark};
    use crate::state::Int;
    use crate::test::tests;

    type TwinsLock = super::TwinsLock<ImmediatePark>;

    #[test]
    fn smoke() {
        tests::smoke::<TwinsLock>();
    }

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<super::TwinsLock<SpinThenPark>>();
        tests::lots_and_lots_lock::<super::TwinsLock<YieldThenPark>>();
        tests::lots_and_lots_lock::<TwinsLock>();
    }

    #[test]
    fn lots_and_lots_mixed_lock() {
        tests::lots_and_lots_mixed_lock::<TwinsLock>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<TwinsLock>();
    }

    #[test]
    fn test_no_lost_wakeup() {
        tests::test_no_lost_wakeup::<TwinsLock>();
    }

    #[test]
    fn third_caller_blocks_until_unlock() {
        let lock = TwinsLock::new();
        let (tx, rx) = mpsc::channel();
        lock.lock();
        lock.lock();
        thread::scope(|s| {
            s.spawn(|| {
                lock.lock();
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            assert!(lock.has_queued_threads());
            lock.unlock().unwrap();
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        });
        assert_eq!(lock.available_permits(), 0);
    }

    #[test]
    fn at_most_two_holders() {
        const THREADS: usize = 8;
        let lock = TwinsLock::new();
        let holders = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..100 {
                        lock.lock();
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        holders.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock().unwrap();
                    }
                });
            }
        });
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak));
        assert_eq!(lock.available_permits(), 2);
    }

    #[test]
    fn over_release_is_rejected() {
        let lock = TwinsLock::new();
        assert_eq!(lock.unlock(), Err(Error::NotOwner));
        assert_eq!(lock.available_permits(), 2);
    }

    #[test]
    fn over_release_at_int_max_is_rejected() {
        let lock = TwinsLock::with_permits(Int::MAX).unwrap();
        assert_eq!(lock.unlock(), Err(Error::NotOwner));
        assert_eq!(lock.available_permits(), Int::MAX);
        lock.lock();
        assert_eq!(lock.available_permits(), Int::MAX - 1);
        lock.unlock().unwrap();
        assert_eq!(lock.unlock(), Err(Error::NotOwner));
        assert_eq!(lock.available_permits(), Int::MAX);
    }

    #[test]
    fn acquire_underflow_fails_without_changing_state() {
        let lock = TwinsLock::new();
        assert!(!lock.sync.try_acquire_shared(Int::MIN));
        assert!(!lock.sync.try_acquire_shared(3));
        assert_eq!(lock.available_permits(), 2);
    }

    #[test]
    fn with_permits_rejects_non_positive() {
        assert!(matches!(TwinsLock::with_permits(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(TwinsLock::with_permits(-1), Err(Error::InvalidArgument(_))));
        let lock = TwinsLock::with_permits(1).unwrap();
        lock.lock();
        assert!(!lock.try_lock());
        lock.unlock().unwrap();
    }

    #[test]
    fn debug() {
        let lock = TwinsLock::new();
        assert_eq!(format!("{lock:?}"), "TwinsLock { available: 2, queued: false }");
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;
    use crate::park::ImmediatePark;
    use crate::relax::Yield;

    type TwinsLock = super::TwinsLock<ImmediatePark<Yield>>;

    #[test]
    fn lock_join() {
        models::lock_join::<TwinsLock>();
    }

    #[test]
    fn shared_bound() {
        models::shared_bound::<TwinsLock>();
    }
}
