use std::time::Instant;

#[cfg(not(all(loom, test)))]
pub(crate) use common::Parker;

#[cfg(all(loom, test))]
pub(crate) use loom::Parker;

/// How a call to [`ParkerT::park`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Woken by a matching unpark call, possibly a stale one.
    Unparked,
    /// The validation callback returned `false`, the thread never slept.
    Invalid,
    /// The deadline elapsed before an unpark call arrived.
    TimedOut,
}

/// A trait that specifies the contract of use for Parker implementations.
///
/// Threads are put to sleep on an address sized `key`, and woken by other
/// threads naming that same key. Currently, this crate leverages
/// `parking_lot_core`'s global parking lot, which serializes validation of a
/// park request with every unpark request for the same key. That is what
/// rules out lost wakeups: a waiter re-checks its wait condition under the
/// bucket lock, so a waker that changes the condition before unparking is
/// either observed by the validation or finds the waiter already queued.
pub(crate) trait ParkerT {
    /// Parks the current thread on `key` until it is unparked or `deadline`
    /// elapses.
    ///
    /// The thread is only put to sleep if `validate` returns `true`. The
    /// `token` identifies this thread among other threads parked on the same
    /// key, see [`unpark_token`].
    ///
    /// Callers must loop: spurious and stale wakeups are possible.
    ///
    /// # Safety
    ///
    /// `validate` is run while a parking lot bucket lock is held: it must not
    /// panic and must not call back into any park or unpark function.
    ///
    /// [`unpark_token`]: ParkerT::unpark_token
    unsafe fn park<V>(key: usize, token: usize, validate: V, deadline: Option<Instant>) -> Wake
    where
        V: FnOnce() -> bool;

    /// Unparks every thread parked on `key`.
    fn unpark_all(key: usize);

    /// Unparks the threads parked on `key` with a matching `token`.
    fn unpark_token(key: usize, token: usize);
}

#[cfg(not(all(loom, test)))]
mod common {
    use std::time::Instant;

    use parking_lot_core::{FilterOp, ParkResult, ParkToken, DEFAULT_UNPARK_TOKEN};

    use super::{ParkerT, Wake};

    #[derive(Debug)]
    pub struct Parker;

    impl ParkerT for Parker {
        unsafe fn park<V>(key: usize, token: usize, validate: V, deadline: Option<Instant>) -> Wake
        where
            V: FnOnce() -> bool,
        {
            let before_sleep = || {};
            let timed_out = |_: usize, _: bool| {};
            let token = ParkToken(token);
            // SAFETY: Caller guarantees that `validate` does not panic and does
            // not call into the parking lot. Other callbacks are no-ops.
            let result = unsafe {
                parking_lot_core::park(key, validate, before_sleep, timed_out, token, deadline)
            };
            match result {
                ParkResult::Unparked(_) => Wake::Unparked,
                ParkResult::Invalid => Wake::Invalid,
                ParkResult::TimedOut => Wake::TimedOut,
            }
        }

        fn unpark_all(key: usize) {
            // SAFETY: No callbacks are involved. Waking a thread parked on a
            // reused address is a spurious wakeup, which all callers handle.
            unsafe {
                parking_lot_core::unpark_all(key, DEFAULT_UNPARK_TOKEN);
            }
        }

        fn unpark_token(key: usize, token: usize) {
            let token = ParkToken(token);
            let filter = |parked: ParkToken| if parked == token { FilterOp::Unpark } else { FilterOp::Skip };
            // SAFETY: Both callbacks are trivial, they never panic nor call into
            // the parking lot.
            unsafe {
                parking_lot_core::unpark_filter(key, filter, |_| DEFAULT_UNPARK_TOKEN);
            }
        }
    }
}

/// Loom can not model OS level parking, so a parked thread simply yields back
/// to the Loom scheduler and reports a (possibly spurious) wakeup.
#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
mod loom {
    use std::time::Instant;

    use loom::thread;

    use super::{ParkerT, Wake};

    #[derive(Debug)]
    pub struct Parker;

    impl ParkerT for Parker {
        unsafe fn park<V>(_key: usize, _token: usize, validate: V, deadline: Option<Instant>) -> Wake
        where
            V: FnOnce() -> bool,
        {
            if !validate() {
                return Wake::Invalid;
            }
            thread::yield_now();
            match deadline {
                Some(deadline) if Instant::now() >= deadline => Wake::TimedOut,
                _ => Wake::Unparked,
            }
        }

        fn unpark_all(_key: usize) {}

        fn unpark_token(_key: usize, _token: usize) {}
    }
}
