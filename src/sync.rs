//! The synchronizer core.
//!
//! A [`Synchronizer`] pairs a [`State`] cell with a wait queue and drives the
//! acquire and release protocols on behalf of a consumer supplied strategy.
//! The strategy only decides whether the state word can be moved to the
//! acquired or released configuration, with a single compare-and-set. The
//! synchronizer takes care of queueing the callers that failed, putting them
//! to sleep and resuming them in FIFO order.
//!
//! Strategies opt into exclusive acquisition by implementing [`Exclusive`],
//! and into shared acquisition by implementing [`Shared`]. The operations of
//! each mode are only available for strategies of that mode.
//!
//! # Barging
//!
//! Every acquisition first tries the strategy before looking at the queue. A
//! newly arriving caller may therefore win the state while other callers are
//! queued. Among callers that actually block, resumption follows queue order.

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use std::time::{Duration, Instant};

use crate::condition::Condition;
use crate::context::{self, Context};
use crate::error::Error;
use crate::park::{Park, SpinThenPark};
use crate::parker::Wake;
use crate::queue::{Mode, Node, WaitQueue};
use crate::relax::Relax;
use crate::state::{Int, State};

/// Consumer supplied hooks for exclusive acquisition.
///
/// Hooks must not block: they are expected to inspect the state and attempt a
/// single transition, retrying only when a compare-and-set loses a race.
///
/// # Example
///
/// ```
/// use qsync::{Error, Exclusive, Int, State, Synchronizer};
///
/// struct Flag;
///
/// impl Exclusive for Flag {
///     fn try_acquire(&self, state: &State, _: Int) -> bool {
///         state.compare_and_set(0, 1)
///     }
///
///     fn try_release(&self, state: &State, _: Int) -> Result<bool, Error> {
///         state.compare_and_set(1, 0).then_some(true).ok_or(Error::NotOwner)
///     }
/// }
///
/// let sync: Synchronizer<Flag> = Synchronizer::new(Flag, 0);
/// sync.acquire(1);
/// assert!(!sync.try_acquire(1));
/// assert_eq!(sync.release(1), Ok(true));
/// assert_eq!(sync.release(1), Err(Error::NotOwner));
/// ```
pub trait Exclusive {
    /// Attempts to acquire in exclusive mode, returning `true` on success.
    fn try_acquire(&self, state: &State, arg: Int) -> bool;

    /// Attempts to release in exclusive mode.
    ///
    /// Returns `Ok(true)` if the state is now fully released, so that a
    /// queued caller should be resumed, and `Ok(false)` if the caller still
    /// holds part of it.
    fn try_release(&self, state: &State, arg: Int) -> Result<bool, Error>;

    /// Returns `true` if the calling thread holds the state exclusively.
    ///
    /// Conditions rely on this hook, the default implementation reports
    /// [`Error::UnsupportedMode`].
    fn is_held_exclusively(&self, state: &State) -> Result<bool, Error> {
        let _ = state;
        Err(Error::UnsupportedMode)
    }
}

/// Consumer supplied hooks for shared acquisition.
pub trait Shared {
    /// Attempts to acquire in shared mode.
    ///
    /// A negative value reports failure. Otherwise the acquisition succeeded,
    /// and the value is the number of holders that may still follow. When it
    /// is positive the successor of the caller is resumed as well.
    fn try_acquire_shared(&self, state: &State, arg: Int) -> Int;

    /// Attempts to release in shared mode.
    ///
    /// Returns `Ok(true)` if a queued caller may now be able to acquire.
    fn try_release_shared(&self, state: &State, arg: Int) -> Result<bool, Error>;
}

/// Timed waits shorter than this busy-wait instead of parking.
pub const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1000);

/// How a blocked caller is willing to wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Wait {
    pub(crate) interruptible: bool,
    pub(crate) deadline: Option<Instant>,
}

impl Wait {
    pub(crate) const UNINTERRUPTIBLY: Self = Self { interruptible: false, deadline: None };

    pub(crate) const INTERRUPTIBLY: Self = Self { interruptible: true, deadline: None };

    /// An interruptible wait bounded by `deadline`, if any.
    pub(crate) fn until(deadline: Option<Instant>) -> Self {
        Self { interruptible: true, deadline }
    }

    /// Returns the wait time left, or `None` once the deadline has passed.
    ///
    /// A `last` park that timed out is taken as expired without reading the
    /// clock again.
    pub(crate) fn remaining(&self, last: Wake) -> Option<Option<Duration>> {
        match self.deadline {
            None => Some(None),
            Some(_) if last == Wake::TimedOut => None,
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(left) if !left.is_zero() => Some(Some(left)),
                _ => None,
            },
        }
    }
}

/// Converts a relative timeout into a deadline, saturating to no deadline at
/// all when the clock would overflow.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Converts a nanosecond count into a timeout, `None` if it is not positive.
fn timeout_from_nanos(nanos: i64) -> Option<Duration> {
    u64::try_from(nanos).ok().filter(|&nanos| nanos > 0).map(Duration::from_nanos)
}

/// Cancels the caller's node if a strategy hook unwinds while it is queued.
struct CancelOnUnwind<'a> {
    queue: &'a WaitQueue,
    node: *mut Node,
    armed: bool,
}

impl CancelOnUnwind<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::warn!("strategy hook panicked, cancelling queued node {:p}", self.node);
            // SAFETY: The node is still linked and this thread drives it.
            unsafe { self.queue.cancel(self.node) };
        }
    }
}

/// A queue-based synchronizer.
///
/// The synchronizer owns the [`State`] cell and the wait queue. Its meaning
/// comes entirely from the strategy `S`, which implements [`Exclusive`],
/// [`Shared`] or both. The parking policy `P` decides how long a caller that
/// is next in line keeps retrying before it is put to sleep, see [`park`].
///
/// Acquire and release arguments are passed through to the strategy
/// unchanged.
///
/// [`park`]: crate::park
pub struct Synchronizer<S, P = SpinThenPark> {
    state: State,
    queue: WaitQueue,
    strategy: S,
    policy: PhantomData<fn() -> P>,
}

impl<S, P> Synchronizer<S, P> {
    /// Creates a new synchronizer with an empty queue and `initial` state.
    #[cfg(not(all(loom, test)))]
    #[must_use]
    pub const fn new(strategy: S, initial: Int) -> Self {
        let state = State::new(initial);
        let queue = WaitQueue::new();
        Self { state, queue, strategy, policy: PhantomData }
    }

    /// Creates a new synchronizer with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new(strategy: S, initial: Int) -> Self {
        let state = State::new(initial);
        let queue = WaitQueue::new();
        Self { state, queue, strategy, policy: PhantomData }
    }

    /// Returns the state cell.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Returns the strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Returns `true` if some thread may be waiting to acquire.
    ///
    /// Queue membership changes concurrently, so the answer is only a hint.
    pub fn has_queued_threads(&self) -> bool {
        self.queue.has_queued_threads()
    }

    /// Returns `true` if any caller ever had to wait for this synchronizer.
    pub fn has_contended(&self) -> bool {
        self.queue.has_contended()
    }

    pub(crate) fn queue(&self) -> &WaitQueue {
        &self.queue
    }
}

impl<S, P: Park> Synchronizer<S, P> {
    /// Drives a linked `node` until `try_acquire` succeeds through it.
    ///
    /// `try_acquire` returns `None` on failure, or the number of holders that
    /// may still follow on success. Returns `Ok(true)` once acquired, with the
    /// node promoted to head. Returns `Ok(false)` when the deadline passes and
    /// `Err(Interrupted)` when interrupted, with the node cancelled.
    ///
    /// # Safety
    ///
    /// `node` must have been enqueued in this synchronizer's queue and must
    /// not be driven by any other thread.
    pub(crate) unsafe fn acquire_queued<F>(
        &self,
        node: *mut Node,
        wait: Wait,
        mut try_acquire: F,
    ) -> Result<bool, Error>
    where
        F: FnMut() -> Option<Int>,
    {
        let ctx = context::current();
        // SAFETY: Caller guarantees `node` is valid.
        let shared = unsafe { &*node }.mode() == Mode::Shared;
        let mut guard = CancelOnUnwind { queue: &self.queue, node, armed: true };
        let mut policy = P::new();
        let mut relax = P::Relax::new();
        let mut wake = Wake::Unparked;
        loop {
            let seq = self.queue.signals();
            // SAFETY: Caller guarantees we drive `node`.
            let pred = unsafe { self.queue.skip_cancelled(node) };
            if self.queue.is_head(pred) {
                if let Some(remaining) = try_acquire() {
                    guard.disarm();
                    // SAFETY: `pred` is the head and the predecessor of `node`.
                    unsafe { self.queue.set_head(node, pred) };
                    // A release that raced with this acquisition may have
                    // targeted the old head, pass it on. Propagating counts as
                    // a release so that a successor about to park sees it.
                    if shared && (remaining > 0 || self.queue.signals() != seq) {
                        self.queue.signal();
                    }
                    return Ok(true);
                }
            }
            if wait.interruptible && ctx.take_interrupt() {
                guard.disarm();
                // SAFETY: The node is linked and we drive it.
                unsafe { self.queue.cancel(node) };
                return Err(Error::Interrupted);
            }
            let Some(left) = wait.remaining(wake) else {
                guard.disarm();
                // SAFETY: The node is linked and we drive it.
                unsafe { self.queue.cancel(node) };
                return Ok(false);
            };
            if self.queue.is_head(pred) && !policy.should_park() {
                policy.on_failure();
                relax.relax();
                continue;
            }
            if matches!(left, Some(left) if left < SPIN_FOR_TIMEOUT_THRESHOLD) {
                relax.relax();
                continue;
            }
            // SAFETY: We are the effective successor of `pred` and `ctx` is
            // the current thread's context.
            wake = unsafe { self.queue.park(&ctx, pred, seq, wait.interruptible, wait.deadline) };
        }
    }

    /// Allocates and enqueues a node, then drives it.
    fn acquire_slow<F>(&self, mode: Mode, wait: Wait, try_acquire: F) -> Result<bool, Error>
    where
        F: FnMut() -> Option<Int>,
    {
        let node = Node::alloc(mode);
        // SAFETY: The node is fresh, once linked it is only driven by us.
        unsafe {
            self.queue.enqueue(node);
            self.acquire_queued(node, wait, try_acquire)
        }
    }
}

impl<S: Exclusive, P: Park> Synchronizer<S, P> {
    /// Acquires in exclusive mode, ignoring interrupts.
    ///
    /// Tries the strategy once, then queues the caller and parks it until it
    /// acquires.
    pub fn acquire(&self, arg: Int) {
        if self.try_acquire(arg) {
            return;
        }
        let acquired = self.acquire_exclusive(arg, Wait::UNINTERRUPTIBLY);
        debug_assert_eq!(acquired, Ok(true));
    }

    /// Acquires in exclusive mode, failing with [`Error::Interrupted`] if the
    /// calling thread is interrupted before or while waiting.
    pub fn acquire_interruptibly(&self, arg: Int) -> Result<(), Error> {
        if context::interrupted() {
            return Err(Error::Interrupted);
        }
        if self.try_acquire(arg) {
            return Ok(());
        }
        self.acquire_exclusive(arg, Wait::INTERRUPTIBLY).map(drop)
    }

    /// Attempts to acquire in exclusive mode without queueing.
    pub fn try_acquire(&self, arg: Int) -> bool {
        self.strategy.try_acquire(&self.state, arg)
    }

    /// Attempts to acquire in exclusive mode, waiting at most `nanos`
    /// nanoseconds.
    ///
    /// Returns `Ok(false)` if the time elapsed first. A non-positive timeout
    /// only tries the strategy once.
    pub fn try_acquire_nanos(&self, arg: Int, nanos: i64) -> Result<bool, Error> {
        let timeout = timeout_from_nanos(nanos);
        let deadline = timeout.and_then(deadline_after);
        self.try_acquire_until_inner(arg, deadline, timeout.is_none())
    }

    /// Attempts to acquire in exclusive mode, waiting until `deadline` at
    /// most.
    pub fn try_acquire_until(&self, arg: Int, deadline: Instant) -> Result<bool, Error> {
        self.try_acquire_until_inner(arg, Some(deadline), false)
    }

    fn try_acquire_until_inner(
        &self,
        arg: Int,
        deadline: Option<Instant>,
        expired: bool,
    ) -> Result<bool, Error> {
        if context::interrupted() {
            return Err(Error::Interrupted);
        }
        if self.try_acquire(arg) {
            return Ok(true);
        }
        if expired {
            return Ok(false);
        }
        self.acquire_exclusive(arg, Wait::until(deadline))
    }

    /// Attempts to acquire in exclusive mode until `deadline`, ignoring
    /// interrupts.
    #[cfg_attr(not(feature = "lock_api"), allow(dead_code))]
    pub(crate) fn try_acquire_until_uninterruptibly(&self, arg: Int, deadline: Instant) -> bool {
        let wait = Wait { interruptible: false, deadline: Some(deadline) };
        self.try_acquire(arg) || self.acquire_exclusive(arg, wait).unwrap_or(false)
    }

    /// Releases in exclusive mode.
    ///
    /// If the strategy reports the state as fully released, the first queued
    /// caller is resumed. Returns the strategy's answer.
    pub fn release(&self, arg: Int) -> Result<bool, Error> {
        let released = self.strategy.try_release(&self.state, arg)?;
        if released {
            self.queue.signal();
        }
        Ok(released)
    }

    /// Returns `true` if the calling thread holds this synchronizer
    /// exclusively.
    pub fn is_held_exclusively(&self) -> Result<bool, Error> {
        self.strategy.is_held_exclusively(&self.state)
    }

    /// Creates a new condition bound to this synchronizer.
    ///
    /// Fails with [`Error::UnsupportedMode`] if the strategy does not report
    /// exclusive ownership, see [`Exclusive::is_held_exclusively`].
    pub fn new_condition(&self) -> Result<Condition<'_, S, P>, Error> {
        self.is_held_exclusively()?;
        Ok(Condition::new(self))
    }

    /// Reacquires `saved` through a node transferred from a condition.
    ///
    /// # Safety
    ///
    /// Same contract as [`acquire_queued`].
    ///
    /// [`acquire_queued`]: Synchronizer::acquire_queued
    pub(crate) unsafe fn reacquire(&self, node: *mut Node, saved: Int) {
        let try_acquire = || self.try_acquire(saved).then_some(0);
        // SAFETY: Caller upholds the contract.
        let acquired = unsafe { self.acquire_queued(node, Wait::UNINTERRUPTIBLY, try_acquire) };
        debug_assert_eq!(acquired, Ok(true));
    }

    fn acquire_exclusive(&self, arg: Int, wait: Wait) -> Result<bool, Error> {
        self.acquire_slow(Mode::Exclusive, wait, || self.try_acquire(arg).then_some(0))
    }
}

impl<S: Shared, P: Park> Synchronizer<S, P> {
    /// Acquires in shared mode, ignoring interrupts.
    pub fn acquire_shared(&self, arg: Int) {
        if self.try_acquire_shared(arg) {
            return;
        }
        let acquired = self.acquire_shared_inner(arg, Wait::UNINTERRUPTIBLY);
        debug_assert_eq!(acquired, Ok(true));
    }

    /// Acquires in shared mode, failing with [`Error::Interrupted`] if the
    /// calling thread is interrupted before or while waiting.
    pub fn acquire_shared_interruptibly(&self, arg: Int) -> Result<(), Error> {
        if context::interrupted() {
            return Err(Error::Interrupted);
        }
        if self.try_acquire_shared(arg) {
            return Ok(());
        }
        self.acquire_shared_inner(arg, Wait::INTERRUPTIBLY).map(drop)
    }

    /// Attempts to acquire in shared mode without queueing.
    pub fn try_acquire_shared(&self, arg: Int) -> bool {
        self.strategy.try_acquire_shared(&self.state, arg) >= 0
    }

    /// Attempts to acquire in shared mode, waiting at most `nanos`
    /// nanoseconds.
    pub fn try_acquire_shared_nanos(&self, arg: Int, nanos: i64) -> Result<bool, Error> {
        if context::interrupted() {
            return Err(Error::Interrupted);
        }
        if self.try_acquire_shared(arg) {
            return Ok(true);
        }
        let Some(timeout) = timeout_from_nanos(nanos) else {
            return Ok(false);
        };
        self.acquire_shared_inner(arg, Wait::until(deadline_after(timeout)))
    }

    /// Releases in shared mode, resuming the first queued caller if the
    /// strategy reports that one may now acquire.
    pub fn release_shared(&self, arg: Int) -> Result<bool, Error> {
        let released = self.strategy.try_release_shared(&self.state, arg)?;
        if released {
            self.queue.signal();
        }
        Ok(released)
    }

    fn acquire_shared_inner(&self, arg: Int, wait: Wait) -> Result<bool, Error> {
        let try_acquire = || {
            let remaining = self.strategy.try_acquire_shared(&self.state, arg);
            (remaining >= 0).then_some(remaining)
        };
        self.acquire_slow(Mode::Shared, wait, try_acquire)
    }
}

impl<S, P> Debug for Synchronizer<S, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Synchronizer");
        d.field("state", &self.state.get());
        d.field("queued", &self.has_queued_threads());
        d.finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{mpsc, Arc, Mutex as StdMutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{timeout_from_nanos, Exclusive, Shared, Synchronizer, Wait};
    use crate::context;
    use crate::error::Error;
    use crate::park::ImmediatePark;
    use crate::parker::Wake;
    use crate::state::{Int, State};

    /// A binary flag without owner tracking.
    struct Flag;

    impl Exclusive for Flag {
        fn try_acquire(&self, state: &State, _: Int) -> bool {
            state.compare_and_set(0, 1)
        }

        fn try_release(&self, state: &State, _: Int) -> Result<bool, Error> {
            state.compare_and_set(1, 0).then_some(true).ok_or(Error::NotOwner)
        }
    }

    /// A counting semaphore.
    struct Permits;

    impl Shared for Permits {
        fn try_acquire_shared(&self, state: &State, arg: Int) -> Int {
            loop {
                let current = state.get();
                let remaining = current - arg;
                if remaining < 0 || state.compare_and_set(current, remaining) {
                    return remaining;
                }
            }
        }

        fn try_release_shared(&self, state: &State, arg: Int) -> Result<bool, Error> {
            loop {
                let current = state.get();
                if state.compare_and_set(current, current + arg) {
                    return Ok(true);
                }
            }
        }
    }

    /// Panics whenever the victim thread could have acquired.
    struct Faulty {
        victim: AtomicU64,
    }

    impl Exclusive for Faulty {
        fn try_acquire(&self, state: &State, _: Int) -> bool {
            if state.get() == 0 && self.victim.load(Ordering::SeqCst) == context::current_id() {
                panic!("faulty strategy");
            }
            state.compare_and_set(0, 1)
        }

        fn try_release(&self, state: &State, _: Int) -> Result<bool, Error> {
            state.compare_and_set(1, 0).then_some(true).ok_or(Error::NotOwner)
        }
    }

    type FlagSync = Synchronizer<Flag, ImmediatePark>;

    /// Waits until `len` live nodes are linked behind the head.
    fn wait_queued<S, P>(sync: &Synchronizer<S, P>, len: usize) {
        // SAFETY: Callers only run this while every queued thread is blocked
        // behind a held synchronizer, and none of them is timed.
        while unsafe { sync.queue().len() } != len {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn blocked_callers_resume_in_queue_order() {
        const WAITERS: usize = 6;
        let sync = FlagSync::new(Flag, 0);
        let order = StdMutex::new(Vec::new());
        sync.acquire(1);
        thread::scope(|s| {
            for id in 0..WAITERS {
                let (sync, order) = (&sync, &order);
                s.spawn(move || {
                    sync.acquire(1);
                    order.lock().unwrap().push(id);
                    sync.release(1).unwrap();
                });
                wait_queued(&sync, id + 1);
            }
            sync.release(1).unwrap();
        });
        assert_eq!(*order.lock().unwrap(), (0..WAITERS).collect::<Vec<_>>());
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn release_without_holder_reports_strategy_error() {
        let sync = FlagSync::new(Flag, 0);
        assert_eq!(sync.release(1), Err(Error::NotOwner));
        assert!(!sync.has_queued_threads());
        assert!(!sync.has_contended());
    }

    #[test]
    fn new_condition_requires_ownership_hook() {
        let sync = FlagSync::new(Flag, 0);
        assert!(matches!(sync.new_condition(), Err(Error::UnsupportedMode)));
    }

    #[test]
    fn pending_interrupt_fails_fast() {
        let sync = FlagSync::new(Flag, 0);
        context::current().interrupt();
        assert_eq!(sync.acquire_interruptibly(1), Err(Error::Interrupted));
        assert!(!context::current().is_interrupted());
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn non_positive_timeout_only_tries_once() {
        let sync = FlagSync::new(Flag, 1);
        let start = Instant::now();
        assert_eq!(sync.try_acquire_nanos(1, 0), Ok(false));
        assert_eq!(sync.try_acquire_nanos(1, -5), Ok(false));
        assert!(!sync.has_queued_threads());
        assert!(start.elapsed() < Duration::from_secs(1));

        let shared = Synchronizer::<Permits, ImmediatePark>::new(Permits, 0);
        assert_eq!(shared.try_acquire_shared_nanos(1, 0), Ok(false));
        assert_eq!(shared.try_acquire_shared_nanos(1, i64::MIN), Ok(false));
        assert!(!shared.has_queued_threads());
    }

    #[test]
    fn timed_out_park_expires_the_wait() {
        let wait = Wait::until(Instant::now().checked_add(Duration::from_secs(60)));
        assert!(matches!(wait.remaining(Wake::Unparked), Some(Some(_))));
        assert!(matches!(wait.remaining(Wake::Invalid), Some(Some(_))));
        assert_eq!(wait.remaining(Wake::TimedOut), None);
        assert_eq!(Wait::INTERRUPTIBLY.remaining(Wake::TimedOut), Some(None));

        let past = Wait::until(Some(Instant::now()));
        assert_eq!(past.remaining(Wake::Unparked), None);
    }

    #[test]
    fn nanos_convert_to_timeouts() {
        assert_eq!(timeout_from_nanos(0), None);
        assert_eq!(timeout_from_nanos(-1), None);
        assert_eq!(timeout_from_nanos(i64::MIN), None);
        assert_eq!(timeout_from_nanos(1_500), Some(Duration::from_nanos(1_500)));
    }

    #[test]
    fn timed_out_node_does_not_block_successors() {
        let sync = FlagSync::new(Flag, 0);
        sync.acquire(1);
        thread::scope(|s| {
            let timed = s.spawn(|| sync.try_acquire_nanos(1, 20_000_000));
            while !sync.has_queued_threads() {
                thread::yield_now();
            }
            let blocked = s.spawn(|| {
                sync.acquire(1);
                sync.release(1).unwrap();
            });
            assert_eq!(timed.join().unwrap(), Ok(false));
            sync.release(1).unwrap();
            blocked.join().unwrap();
        });
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn shared_release_propagates_to_all_waiters() {
        const WAITERS: usize = 4;
        let sync = Synchronizer::<Permits, ImmediatePark>::new(Permits, 0);
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            for _ in 0..WAITERS {
                let (sync, tx) = (&sync, tx.clone());
                s.spawn(move || {
                    sync.acquire_shared(1);
                    tx.send(()).unwrap();
                });
            }
            wait_queued(&sync, WAITERS);
            // A single release makes room for everyone at once.
            sync.release_shared(WAITERS as Int).unwrap();
            for _ in 0..WAITERS {
                rx.recv_timeout(Duration::from_secs(10)).unwrap();
            }
        });
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn shared_timed_acquire_times_out() {
        let sync = Synchronizer::<Permits, ImmediatePark>::new(Permits, 0);
        assert_eq!(sync.try_acquire_shared_nanos(1, 10_000_000), Ok(false));
        sync.release_shared(1).unwrap();
        assert_eq!(sync.try_acquire_shared_nanos(1, 10_000_000), Ok(true));
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn shared_interruptible_acquire() {
        let sync = Arc::new(Synchronizer::<Permits, ImmediatePark>::new(Permits, 0));
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn({
            let sync = Arc::clone(&sync);
            move || {
                tx.send(context::current()).unwrap();
                sync.acquire_shared_interruptibly(1)
            }
        });
        let ctx = rx.recv().unwrap();
        while !sync.has_queued_threads() {
            thread::yield_now();
        }
        ctx.interrupt();
        assert_eq!(handle.join().unwrap(), Err(Error::Interrupted));
        sync.release_shared(1).unwrap();
        sync.acquire_shared(1);
        assert_eq!(sync.state().get(), 0);
    }

    #[test]
    fn panicking_strategy_cancels_its_node() {
        let sync = Synchronizer::<Faulty, ImmediatePark>::new(Faulty { victim: AtomicU64::new(0) }, 1);
        thread::scope(|s| {
            let faulty = s.spawn(|| {
                sync.strategy().victim.store(context::current_id(), Ordering::SeqCst);
                panic::catch_unwind(AssertUnwindSafe(|| sync.acquire(1)))
            });
            let healthy = s.spawn(|| {
                while sync.strategy().victim.load(Ordering::SeqCst) == 0 {
                    thread::yield_now();
                }
                sync.acquire(1);
                sync.release(1).unwrap();
            });
            while !sync.has_queued_threads() {
                thread::yield_now();
            }
            thread::sleep(Duration::from_millis(20));
            sync.release(1).unwrap();
            // The victim either panicked before queueing or cancelled its node.
            assert!(faulty.join().unwrap().is_err());
            healthy.join().unwrap();
        });
        assert_eq!(sync.state().get(), 0);
        assert!(!sync.has_queued_threads());
    }

    #[test]
    fn debug() {
        let sync = FlagSync::new(Flag, 1);
        assert_eq!(format!("{sync:?}"), "Synchronizer { state: 1, queued: false }");
    }
}
