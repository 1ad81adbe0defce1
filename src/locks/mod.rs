//! Blocking locks built on top of the [`Synchronizer`].
//!
//! These are thin consumers of the synchronizer: each one supplies a strategy
//! that maps its locking semantics onto the [`State`] word, and forwards its
//! operations to the synchronizer's acquire and release families.
//!
//! - [`Mutex`] is an exclusive lock with owner tracking, interruptible and
//!   timed acquisition, and condition variables.
//! - [`TwinsLock`] is a counted shared lock that admits at most two holders
//!   at a time by default.
//!
//! Both locks are generic over a [`Park`] policy, which defaults to
//! [`SpinThenPark`].
//!
//! [`Synchronizer`]: crate::Synchronizer
//! [`State`]: crate::State
//! [`Park`]: crate::park::Park
//! [`SpinThenPark`]: crate::park::SpinThenPark

mod mutex;
mod twins;

pub use mutex::{Mutex, Ownership};
pub use twins::{Permits, TwinsLock};
