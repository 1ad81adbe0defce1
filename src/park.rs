//! Thread parking policies that determine the behaviour of queued waiters.
//!
//! When a thread is "parked", it essentially goes into a sleeping state until
//! it is awakened by a releasing thread, an interrupt or a timeout. This is
//! used to prevent busy-waiting, where a thread continuously checks for a
//! condition to be true, wasting CPU resources.
//!
//! A waiter that is first in line may still prefer to retry its acquisition a
//! few times before sleeping, since the current holder is likely to release
//! soon. The `Park` trait lets users decide _when_ should the current thread
//! be put to sleep, the synchronizer takes care of the rest. Waiters further
//! back in the queue are always parked right away.

use core::marker::PhantomData;

use crate::relax::{Loop, Relax, Spin, SpinBackoff, Yield};

/// The thread parking waiting policy to be applied when the synchronizer is
/// contended.
///
/// # Example
///
/// ```
/// use qsync::park::Park;
/// use qsync::relax::Spin;
///
/// #[derive(Default)]
/// struct SpinThenPark(u32);
///
/// impl Park for SpinThenPark {
///     type Relax = Spin;
///
///     #[inline(always)]
///     fn new() -> Self {
///         Self::default()
///     }
///
///     #[inline(always)]
///     fn should_park(&self) -> bool {
///         self.0 >= 100
///     }
///
///     #[inline(always)]
///     fn on_failure(&mut self) {
///         self.0 += 1;
///     }
/// }
/// ```
pub trait Park {
    /// The relax operation that should be run during a period of contention.
    type Relax: Relax;

    /// Returns the initial value for this parking policy.
    fn new() -> Self;

    /// Hints whether or not should the parking operation be executed at this
    /// time.
    ///
    /// Returning `false` means that the thread is not ready to be put to sleep
    /// yet, it will retry its acquisition first. Returning `true` indicates
    /// that the thread should be parked.
    fn should_park(&self) -> bool;

    /// Updates the inner state whenever the thread fails to acquire.
    ///
    /// This function will be called once whenever both `should_park` returns
    /// `false` **and** the thread fails to acquire. This will not be called
    /// otherwise.
    fn on_failure(&mut self);
}

/// A busy-wait spin-loop then thread sleeping policy.
///
/// A thread parking policy that, while first in line, will initially run a
/// busy-wait spin-loop (signaling the CPU to power down) for a number of
/// attempts and then, if unsuccessful, requests for the current thread to be
/// put to sleep.
///
/// The [`Spin`] relax strategy is executed during waiting loops. This is the
/// default policy of every synchronizer in this crate.
pub struct SpinThenPark {
    bounded: Bounded<{ Self::ATTEMPTS }>,
}

impl SpinThenPark {
    /// The maximum number of attempts this policy will run before being parked.
    const ATTEMPTS: Uint = DEFAULT_ATTEMPTS;
}

impl Park for SpinThenPark {
    type Relax = Spin;

    fn new() -> Self {
        Self { bounded: Bounded::new() }
    }

    fn should_park(&self) -> bool {
        self.bounded.should_park()
    }

    fn on_failure(&mut self) {
        self.bounded.on_failure();
    }
}

/// A no power down spin-loop then thread sleeping policy.
///
/// The [`Loop`] relax strategy is executed during waiting loops.
pub struct LoopThenPark {
    bounded: Bounded<{ Self::ATTEMPTS }>,
}

impl LoopThenPark {
    /// The maximum number of attempts this policy will run before being parked.
    const ATTEMPTS: Uint = DEFAULT_ATTEMPTS;
}

impl Park for LoopThenPark {
    type Relax = Loop;

    fn new() -> Self {
        Self { bounded: Bounded::new() }
    }

    fn should_park(&self) -> bool {
        self.bounded.should_park()
    }

    fn on_failure(&mut self) {
        self.bounded.on_failure();
    }
}

/// A thread yielding then thread sleeping policy.
///
/// A thread parking policy that, while first in line, will initially request
/// the OS to yield the current thread, for a number of attempts and then, if
/// unsuccessful, requests for the current thread to be put to sleep.
///
/// The [`Yield`] relax strategy is executed during waiting loops.
pub struct YieldThenPark {
    bounded: Bounded<{ Self::ATTEMPTS }>,
}

impl YieldThenPark {
    /// The maximum number of attempts this policy will run before being parked.
    const ATTEMPTS: Uint = YIELD_ATTEMPTS;
}

impl Park for YieldThenPark {
    type Relax = Yield;

    fn new() -> Self {
        Self { bounded: Bounded::new() }
    }

    fn should_park(&self) -> bool {
        self.bounded.should_park()
    }

    fn on_failure(&mut self) {
        self.bounded.on_failure();
    }
}

/// A spin-loop with exponential backoff then thread sleeping policy.
///
/// The [`SpinBackoff`] relax strategy is executed during waiting loops.
pub struct SpinBackoffThenPark {
    bounded: Bounded<{ Self::ATTEMPTS }>,
}

impl SpinBackoffThenPark {
    /// The maximum number of attempts this policy will run before being parked.
    const ATTEMPTS: Uint = BACKOFF_ATTEMPTS;
}

impl Park for SpinBackoffThenPark {
    type Relax = SpinBackoff;

    fn new() -> Self {
        Self { bounded: Bounded::new() }
    }

    fn should_park(&self) -> bool {
        self.bounded.should_park()
    }

    fn on_failure(&mut self) {
        self.bounded.on_failure();
    }
}

/// Immediately requests the thread to be put to sleep.
///
/// A thread parking policy that never retries before parking. The generic
/// `R` relax strategy is still executed by the few loops that can not park,
/// such as the guard around a condition's waiter list.
///
/// The default relax operation executed is [`Spin`].
pub struct ImmediatePark<R: Relax = Spin> {
    relax: PhantomData<R>,
}

impl<R: Relax> Park for ImmediatePark<R> {
    type Relax = R;

    fn new() -> Self {
        Self { relax: PhantomData }
    }

    fn should_park(&self) -> bool {
        true
    }

    #[cfg(not(tarpaulin_include))]
    fn on_failure(&mut self) {}
}

/// An unsigned integer type use as the inner type for [`Bounded`].
type Uint = u32;

/// A default number of attempts to acquire before parking the thread.
const DEFAULT_ATTEMPTS: Uint = 100;

/// Yielding is a lot more expensive than spinning, so give up sooner.
const YIELD_ATTEMPTS: Uint = 10;

/// Each backoff step doubles the spin count, up to its own limit.
const BACKOFF_ATTEMPTS: Uint = 16;

/// A bounded parking policy that will block the thread for at most some number
/// of attempts.
struct Bounded<const MAX: Uint> {
    attempts: Uint,
}

impl<const MAX: Uint> Bounded<MAX> {
    const fn new() -> Self {
        Self { attempts: 0 }
    }

    const fn should_park(&self) -> bool {
        self.attempts >= MAX
    }

    fn on_failure(&mut self) {
        self.attempts += 1;
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Park, Uint};

    fn parking_loop<P: Park, const MAX: Uint>() -> (P, Uint) {
        let mut parker = P::new();
        let mut counter = 0;
        for _ in 0..=MAX.saturating_mul(10) {
            while !parker.should_park() {
                parker.on_failure();
                counter += 1;
            }
        }
        (parker, counter)
    }

    fn should_park_eventually<P: Park, const MAX: Uint>() {
        let (waiter, counter) = parking_loop::<P, MAX>();
        assert!(waiter.should_park());
        assert_eq!(MAX, counter);
    }

    #[test]
    fn spins() {
        use super::SpinThenPark;
        const MAX: Uint = SpinThenPark::ATTEMPTS;
        should_park_eventually::<SpinThenPark, MAX>();
    }

    #[test]
    fn yields() {
        use super::YieldThenPark;
        const MAX: Uint = YieldThenPark::ATTEMPTS;
        should_park_eventually::<YieldThenPark, MAX>();
    }

    #[test]
    fn loops() {
        use super::LoopThenPark;
        const MAX: Uint = LoopThenPark::ATTEMPTS;
        should_park_eventually::<LoopThenPark, MAX>();
    }

    #[test]
    fn spin_backoff() {
        use super::SpinBackoffThenPark;
        const MAX: Uint = SpinBackoffThenPark::ATTEMPTS;
        should_park_eventually::<SpinBackoffThenPark, MAX>();
    }

    #[test]
    fn immediately() {
        should_park_eventually::<super::ImmediatePark, 0>();
    }
}
