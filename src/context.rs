//! Execution contexts and cooperative interruption.
//!
//! Every thread that touches this crate owns exactly one [`Context`]. A
//! context carries a process unique identifier, used by locks to record their
//! owner, and an interrupt flag. Any thread holding a clone of another
//! thread's context may [`interrupt`] it: interruptible waits, such as
//! [`Mutex::lock_interruptibly`] or [`Condition::wait`], observe the flag and
//! give up with [`Error::Interrupted`]. Uninterruptible waits ignore the flag
//! and leave it set for a later interruptible call to consume.
//!
//! # Examples
//!
//! ```
//! use std::thread;
//!
//! use qsync::context;
//!
//! let ctx = thread::spawn(|| context::current()).join().unwrap();
//! ctx.interrupt();
//! assert!(ctx.is_interrupted());
//!
//! // The flag is per thread.
//! assert!(!context::interrupted());
//! ```
//!
//! [`interrupt`]: Context::interrupt
//! [`Mutex::lock_interruptibly`]: crate::Mutex::lock_interruptibly
//! [`Condition::wait`]: crate::Condition::wait
//! [`Error::Interrupted`]: crate::Error::Interrupted

use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::AtomicU64 as IdCounter;
use core::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::time::Instant;

use crate::cfg::atomic::{AtomicBool, AtomicUsize};
use crate::cfg::sync::Arc;
use crate::cfg::thread::thread_local;
use crate::parker::{Parker, ParkerT, Wake};

/// Identifiers start at 1, `0` is reserved for "no owner".
static NEXT_ID: IdCounter = IdCounter::new(1);

/// Sentinel for a context that is not parked on an interruptible wait.
const NOT_PARKED: usize = 0;

thread_local! {
    static CURRENT: Context = Context::new();
}

/// A handle to the execution context of one thread.
///
/// Handles are cheap to clone and can be sent to other threads.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    interrupted: AtomicBool,
    parked_on: AtomicUsize,
}

impl Context {
    fn new() -> Self {
        let id = NEXT_ID.fetch_add(1, Relaxed);
        let interrupted = AtomicBool::new(false);
        let parked_on = AtomicUsize::new(NOT_PARKED);
        Self { inner: Arc::new(Inner { id, interrupted, parked_on }) }
    }

    /// Returns the unique, non-zero identifier of this context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Interrupts the thread this context belongs to.
    ///
    /// Sets the interrupt flag and, if the thread is currently parked in an
    /// interruptible wait, wakes it up so that it can observe the flag.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, SeqCst);
        let key = self.inner.parked_on.load(SeqCst);
        if key != NOT_PARKED {
            Parker::unpark_token(key, self.token());
        }
    }

    /// Returns `true` if this context has a pending interrupt.
    ///
    /// Unlike [`interrupted`], the flag is left untouched.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(SeqCst)
    }

    /// Clears the interrupt flag, returning whether it was set.
    pub(crate) fn take_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, SeqCst)
    }

    /// Parks the current thread on `key`, see [`ParkerT::park`].
    ///
    /// Interruptible parks are registered so that [`interrupt`] can find
    /// them, and are refused while an interrupt is pending.
    ///
    /// # Safety
    ///
    /// Same contract as [`ParkerT::park`] for `validate`. Must be called by
    /// the thread that owns this context.
    ///
    /// [`interrupt`]: Context::interrupt
    pub(crate) unsafe fn park<V>(
        &self,
        key: usize,
        interruptible: bool,
        validate: V,
        deadline: Option<Instant>,
    ) -> Wake
    where
        V: FnOnce() -> bool,
    {
        let inner = &*self.inner;
        if interruptible {
            inner.parked_on.store(key, SeqCst);
        }
        let validate = || validate() && !(interruptible && inner.interrupted.load(SeqCst));
        // SAFETY: Caller guarantees `validate` upholds the parker contract,
        // the extra check is a single atomic load.
        let wake = unsafe { Parker::park(key, self.token(), validate, deadline) };
        if interruptible {
            inner.parked_on.store(NOT_PARKED, SeqCst);
        }
        wake
    }

    fn token(&self) -> usize {
        self.inner.id as usize
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Context");
        d.field("id", &self.id());
        d.field("interrupted", &self.is_interrupted());
        d.finish()
    }
}

/// Returns a handle to the calling thread's context.
///
/// # Examples
///
/// ```
/// use qsync::context;
///
/// assert_eq!(context::current().id(), context::current().id());
/// ```
#[must_use]
pub fn current() -> Context {
    CURRENT.with(Context::clone)
}

/// Returns the identifier of the calling thread's context.
pub(crate) fn current_id() -> u64 {
    CURRENT.with(Context::id)
}

/// Tests whether the calling thread has been interrupted, clearing its
/// interrupt flag.
///
/// # Examples
///
/// ```
/// use qsync::context;
///
/// context::current().interrupt();
/// assert!(context::interrupted());
/// assert!(!context::interrupted());
/// ```
pub fn interrupted() -> bool {
    CURRENT.with(Context::take_interrupt)
}

#[cfg(all(not(loom), test))]
mod test {
    use std::thread;

    use super::{current, current_id, interrupted};

    #[test]
    fn ids_are_unique_per_thread() {
        let here = current_id();
        let there = thread::spawn(current_id).join().unwrap();
        assert_ne!(here, 0);
        assert_ne!(there, 0);
        assert_ne!(here, there);
        assert_eq!(here, current().id());
    }

    #[test]
    fn interrupt_flag_is_cleared_by_interrupted() {
        let ctx = current();
        assert!(!ctx.is_interrupted());
        ctx.interrupt();
        assert!(ctx.is_interrupted());
        assert!(interrupted());
        assert!(!ctx.is_interrupted());
        assert!(!interrupted());
    }

    #[test]
    fn interrupt_from_another_thread() {
        let ctx = current();
        let remote = ctx.clone();
        thread::spawn(move || remote.interrupt()).join().unwrap();
        assert!(interrupted());
    }

    #[test]
    fn debug() {
        let ctx = current();
        let msg = format!("Context {{ id: {}, interrupted: false }}", ctx.id());
        assert_eq!(msg, format!("{ctx:?}"));
    }
}
