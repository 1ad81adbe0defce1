//! A queue-based synchronizer for building blocking locks.
//!
//! The heart of this crate is the [`Synchronizer`]: a single word of
//! synchronization [`State`] paired with a FIFO queue of blocked callers. It
//! implements the hard parts of a blocking lock once, and lets consumers
//! define what "acquired" means through a small strategy trait:
//!
//! - [`Exclusive`] strategies admit one holder at a time and may back
//!   [`Condition`] variables;
//! - [`Shared`] strategies admit several holders at once, such as permits of
//!   a counted lock.
//!
//! A caller that fails to acquire is queued and put to sleep. Releases resume
//! queued callers in FIFO order, and a shared acquisition that leaves room for
//! more holders propagates the wakeup down the queue. Newly arriving callers
//! always try the state once before queueing, so they may barge ahead of
//! queued callers.
//!
//! Every blocking operation comes in an uninterruptible flavour, an
//! interruptible one that gives up when another thread [interrupts] the
//! caller, and a timed one that gives up at a deadline.
//!
//! ## Example locks
//!
//! The [`locks`] module ships two consumers of the synchronizer:
//!
//! - [`Mutex`], an exclusive lock with owner tracking and conditions;
//! - [`TwinsLock`], a shared lock that admits at most two holders.
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use qsync::TwinsLock;
//!
//! let lock: Arc<TwinsLock> = Arc::new(TwinsLock::new());
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let lock = Arc::clone(&lock);
//!         thread::spawn(move || {
//!             lock.lock();
//!             // At most two threads run this section at once.
//!             lock.unlock().unwrap();
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(lock.available_permits(), 2);
//! ```
//!
//! ## Parking policies
//!
//! Every synchronizer is generic over a [`Park`] policy that decides how long
//! the caller next in line keeps retrying before it is put to sleep. Callers
//! further back in the queue are always put to sleep right away. Sleeping is
//! implemented on top of [`parking_lot_core`].
//!
//! ## Features
//!
//! This crate does not provide any default features. Features that can be
//! enabled are:
//!
//! ### lock_api
//!
//! This feature implements the [`RawMutex`] and [`RawMutexTimed`] traits from
//! the [lock_api] crate for [`locks::Mutex`]. Aliases are provided by the
//! [`lock_api`] module, for RAII guarded access to protected data.
//!
//! [interrupts]: context::Context::interrupt
//! [`Park`]: park::Park
//! [`parking_lot_core`]: https://docs.rs/parking_lot_core/latest/parking_lot_core
//! [lock_api]: https://docs.rs/lock_api/latest/lock_api
//! [`lock_api`]: mod@crate::lock_api
//! [`RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`RawMutexTimed`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutexTimed.html

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod condition;
pub mod context;
pub mod error;
pub mod locks;
pub mod park;
pub mod relax;
pub mod state;
pub mod sync;

#[cfg(all(feature = "lock_api", not(all(loom, test))))]
#[cfg_attr(docsrs, doc(cfg(feature = "lock_api")))]
pub mod lock_api;

pub use condition::Condition;
pub use error::Error;
pub use locks::{Mutex, TwinsLock};
pub use state::{Int, State};
pub use sync::{Exclusive, Shared, Synchronizer};

pub(crate) mod cfg;
pub(crate) mod parker;
pub(crate) mod queue;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
pub(crate) mod loom;
