//! Errors reported by the synchronizer and the locks built on top of it.
//!
//! A timed acquisition that reaches its deadline is **not** an error, timed
//! operations report it by returning `Ok(false)`.

/// The error type for synchronizer, condition and lock operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The caller's blocking wait was cancelled by an interrupt, see
    /// [`Context::interrupt`].
    ///
    /// [`Context::interrupt`]: crate::context::Context::interrupt
    #[error("blocking wait was interrupted")]
    Interrupted,

    /// A release or condition operation was attempted by a caller that does
    /// not hold the synchronizer.
    #[error("synchronizer is not held by the current thread")]
    NotOwner,

    /// A lock was configured with an argument it can not operate with.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The synchronization strategy does not support the requested operation,
    /// such as creating a condition without exclusive ownership semantics.
    #[error("operation is not supported by this synchronization mode")]
    UnsupportedMode,
}

#[cfg(all(not(loom), test))]
mod test {
    use super::Error;

    #[test]
    fn display() {
        assert_eq!(Error::Interrupted.to_string(), "blocking wait was interrupted");
        assert_eq!(Error::NotOwner.to_string(), "synchronizer is not held by the current thread");
        let err = Error::InvalidArgument("permits must be positive");
        assert_eq!(err.to_string(), "invalid argument: permits must be positive");
    }
}
