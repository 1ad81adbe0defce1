//! Locking interfaces that are compatible with [lock_api].
//!
//! This module exports [`lock_api::Mutex`] and [`lock_api::MutexGuard`] type
//! aliases with a queued [`locks::Mutex`] as their raw lock. The raw lock
//! implements both [`RawMutex`] and [`RawMutexTimed`] when this feature is
//! enabled, so the guards give RAII access to the protected data.
//!
//! Waits started through these interfaces are not interruptible: lock_api
//! has no way to report an interrupted acquisition. Use [`locks::Mutex`]
//! directly for interruptible waits.
//!
//! The Mutex is generic over the parking policy. The following modules
//! provide type aliases for [`lock_api::Mutex`] and [`lock_api::MutexGuard`]
//! associated with one policy. See their documentation for more information.
//!
//! [`locks::Mutex`]: crate::locks::Mutex
//! [lock_api]: https://crates.io/crates/lock_api
//! [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
//! [`lock_api::MutexGuard`]: https://docs.rs/lock_api/latest/lock_api/struct.MutexGuard.html
//! [`RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`RawMutexTimed`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutexTimed.html

/// A lock that provides mutually exclusive data access that is compatible with
/// [`lock_api`](https://crates.io/crates/lock_api).
pub type Mutex<T, P> = lock_api::Mutex<crate::locks::Mutex<P>, T>;

/// A guard that provides mutable data access that is compatible with
/// [`lock_api`](https://crates.io/crates/lock_api).
pub type MutexGuard<'a, T, P> = lock_api::MutexGuard<'a, crate::locks::Mutex<P>, T>;

/// A queued lock alias that spins for a while, signaling the processor that it
/// is running a busy-wait spin-loop, before putting the thread to sleep.
pub mod spins {
    use crate::park::SpinThenPark;

    /// A queued lock that implements the [`SpinThenPark`] policy and
    /// compatible with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use qsync::lock_api::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    pub type Mutex<T> = super::Mutex<T, SpinThenPark>;

    /// A queued guard that implements the [`SpinThenPark`] policy.
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, SpinThenPark>;

    /// A queued lock alias that, during lock contention, will perform
    /// exponential backoff while spinning, before putting the thread to sleep.
    pub mod backoff {
        use crate::park::SpinBackoffThenPark;

        /// A queued lock that implements the [`SpinBackoffThenPark`] policy
        /// and compatible with the `lock_api` crate.
        ///
        /// # Example
        ///
        /// ```
        /// use qsync::lock_api::spins::backoff::Mutex;
        ///
        /// let mutex = Mutex::new(0);
        /// let guard = mutex.lock();
        /// assert_eq!(*guard, 0);
        /// ```
        pub type Mutex<T> = super::super::Mutex<T, SpinBackoffThenPark>;

        /// A queued guard that implements the [`SpinBackoffThenPark`] policy.
        pub type MutexGuard<'a, T> = super::super::MutexGuard<'a, T, SpinBackoffThenPark>;
    }
}

/// A queued lock alias that yields the current time slice to the OS scheduler
/// for a while, before putting the thread to sleep.
pub mod yields {
    use crate::park::YieldThenPark;

    /// A queued lock that implements the [`YieldThenPark`] policy and
    /// compatible with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use qsync::lock_api::yields::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    pub type Mutex<T> = super::Mutex<T, YieldThenPark>;

    /// A queued guard that implements the [`YieldThenPark`] policy.
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, YieldThenPark>;
}

/// A queued lock alias that rapidly spins without telling the CPU to do any
/// power down, before putting the thread to sleep.
pub mod loops {
    use crate::park::LoopThenPark;

    /// A queued lock that implements the [`LoopThenPark`] policy and
    /// compatible with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use qsync::lock_api::loops::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    pub type Mutex<T> = super::Mutex<T, LoopThenPark>;

    /// A queued guard that implements the [`LoopThenPark`] policy.
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, LoopThenPark>;
}

/// A queued lock alias that puts the thread to sleep as soon as it has to wait.
pub mod immediate {
    use crate::park::ImmediatePark;

    /// A queued lock that implements the [`ImmediatePark`] policy and
    /// compatible with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use qsync::lock_api::immediate::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.try_lock_for(Duration::from_millis(1)).unwrap();
    /// assert_eq!(*guard, 0);
    /// ```
    pub type Mutex<T> = super::Mutex<T, ImmediatePark>;

    /// A queued guard that implements the [`ImmediatePark`] policy.
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, ImmediatePark>;
}
