//! The synchronization state word.

use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::SeqCst;

use crate::cfg::atomic::AtomicIsize;

/// The integer type held by a [`State`] cell and passed as the acquire and
/// release argument of every synchronizer operation.
pub type Int = isize;

/// A single machine word of synchronization state.
///
/// The meaning of the value is entirely defined by the strategy that owns the
/// synchronizer: `0` and `1` for an unlocked and locked mutex, or the number of
/// available permits for a counted lock. Every transition is made through
/// [`compare_and_set`], so no update is ever applied from a stale read.
///
/// [`compare_and_set`]: State::compare_and_set
pub struct State {
    value: AtomicIsize,
}

impl State {
    /// Creates a new state cell holding `initial`.
    ///
    /// # Examples
    ///
    /// ```
    /// use qsync::State;
    ///
    /// let state = State::new(2);
    /// assert_eq!(state.get(), 2);
    /// ```
    #[cfg(not(all(loom, test)))]
    #[must_use]
    pub const fn new(initial: Int) -> Self {
        Self { value: AtomicIsize::new(initial) }
    }

    /// Creates a new state cell with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new(initial: Int) -> Self {
        Self { value: AtomicIsize::new(initial) }
    }

    /// Returns the current value.
    #[inline]
    pub fn get(&self) -> Int {
        self.value.load(SeqCst)
    }

    /// Atomically sets the value to `updated` if it currently holds `expected`.
    ///
    /// Returns `true` on success. This function never retries and never blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use qsync::State;
    ///
    /// let state = State::new(0);
    /// assert!(state.compare_and_set(0, 1));
    /// assert!(!state.compare_and_set(0, 1));
    /// assert_eq!(state.get(), 1);
    /// ```
    #[inline]
    pub fn compare_and_set(&self, expected: Int, updated: Int) -> bool {
        self.value.compare_exchange(expected, updated, SeqCst, SeqCst).is_ok()
    }
}

impl Debug for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("State").field(&self.get()).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::State;

    #[test]
    fn stale_expected_value_is_rejected() {
        let state = State::new(2);
        let seen = state.get();
        assert!(state.compare_and_set(seen, seen - 1));
        assert!(!state.compare_and_set(seen, seen - 1));
        assert_eq!(state.get(), 1);
    }

    #[test]
    fn debug() {
        assert_eq!(format!("{:?}", State::new(7)), "State(7)");
    }
}
