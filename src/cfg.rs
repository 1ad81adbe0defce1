pub mod atomic {
    #[cfg(not(all(loom, test)))]
    pub use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize};

    #[cfg(all(loom, test))]
    pub use loom::sync::atomic::{AtomicBool, AtomicIsize, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize};
}

pub mod cell {
    pub use sealed::WithMutUnchecked;

    #[cfg(not(all(loom, test)))]
    pub use core::cell::UnsafeCell;

    #[cfg(all(loom, test))]
    pub use loom::cell::UnsafeCell;

    #[cfg(not(all(loom, test)))]
    impl<T: ?Sized> WithMutUnchecked<T> for UnsafeCell<T> {
        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret,
        {
            // SAFETY: Caller must guarantee there are no other aliases.
            f(unsafe { &mut *self.get() })
        }
    }

    #[cfg(all(loom, test))]
    impl<T: ?Sized> WithMutUnchecked<T> for UnsafeCell<T> {
        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret,
        {
            // SAFETY: Caller must guarantee there are no other aliases.
            self.with_mut(|ptr| f(unsafe { &mut *ptr }))
        }
    }

    mod sealed {
        /// A trait that extends [`UnsafeCell`] to allow running closures against
        /// its underlying data.
        pub trait WithMutUnchecked<T: ?Sized> {
            /// Runs `f` against a mutable reference borrowed from a [`UnsafeCell`].
            ///
            /// # Safety
            ///
            /// Caller must guarantee there are no other references, shared or
            /// mutable, to the underlying data.
            unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
            where
                F: FnOnce(&mut T) -> Ret;
        }
    }
}

pub mod hint {
    #[cfg(not(all(loom, test)))]
    pub use core::hint::spin_loop;

    #[cfg(all(loom, test))]
    pub use loom::hint::spin_loop;
}

pub mod sync {
    #[cfg(not(all(loom, test)))]
    pub use std::sync::Arc;

    #[cfg(all(loom, test))]
    pub use loom::sync::Arc;
}

pub mod thread {
    #[cfg(not(all(loom, test)))]
    pub use std::thread::yield_now;

    #[cfg(all(loom, test))]
    pub use loom::thread::yield_now;

    #[cfg(not(all(loom, test)))]
    pub use std::thread_local;

    #[cfg(all(loom, test))]
    pub use loom::thread_local;
}
