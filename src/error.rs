use std::sync::Arc;

/// An error that can tell whether it stands for a user cancellation rather
/// than a genuine failure.
///
/// Adapters tag the outcome of "the user pressed cancel" with an error whose
/// `is_cancelled()` returns `true`. Nothing in the chain short-circuits on it,
/// the classification is only there for consumers that want to branch on it.
///
/// # Examples
///
/// ```
/// use pledge::{CancellableError, Error};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("picker closed")]
/// struct PickerClosed;
///
/// impl CancellableError for PickerClosed {
///     fn is_cancelled(&self) -> bool {
///         true
///     }
/// }
///
/// assert!(Error::new(PickerClosed).is_cancelled());
/// assert!(!Error::msg("disk full").is_cancelled());
/// ```
pub trait CancellableError: std::error::Error + Send + Sync + 'static {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// The rejection reason carried by a [`Future`](crate::Future).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("the operation was cancelled")]
    Cancelled,
    #[error("every resolver was dropped before the future settled")]
    ResolverDropped,
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("completion handler received neither a value nor an error")]
    InvalidCallingConvention,
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Domain(Arc<dyn CancellableError>),
}

impl Error {
    /// Wraps an arbitrary domain error. Its own `is_cancelled()` is preserved.
    pub fn new<E: CancellableError>(error: E) -> Self {
        Error::Domain(Arc::new(error))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Panicked(message)
    }
}

impl CancellableError for Error {
    fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Domain(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}

/// Wrapped domain errors compare by identity: two `Domain` errors are equal
/// only when they share the same allocation.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Cancelled, Error::Cancelled) => true,
            (Error::ResolverDropped, Error::ResolverDropped) => true,
            (Error::InvalidCallingConvention, Error::InvalidCallingConvention) => true,
            (Error::Panicked(a), Error::Panicked(b)) => a == b,
            (Error::Message(a), Error::Message(b)) => a == b,
            (Error::Domain(a), Error::Domain(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
