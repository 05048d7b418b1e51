//! Single-assignment futures for bridging callback APIs.
//!
//! A [`Future`] is a read-only handle to a value that will be known later, and
//! a [`Resolver`] is the write-once capability that settles it. A producer
//! creates the pair with [`pending`], hands the resolver to whatever delivers
//! the result (a delegate callback, a completion handler, another thread) and
//! returns the future to the consumer. The consumer chains continuations with
//! [`then`](Future::then), recovers with [`recover`](Future::recover) and
//! registers cleanup that runs on every outcome with [`always`](Future::always).
//!
//! ```
//! use pledge::{pending, CancellableError, Error};
//! use std::sync::{Arc, Mutex};
//!
//! let dismissed = Arc::new(Mutex::new(false));
//! let flag = dismissed.clone();
//!
//! let (picked, resolver) = pending::<u32>();
//! let size = picked
//!     .then(|id| Ok::<_, Error>(id * 1024))
//!     .always(move || *flag.lock().unwrap() = true);
//!
//! // The user pressed cancel.
//! resolver.reject(Error::Cancelled);
//!
//! assert!(*dismissed.lock().unwrap());
//! assert!(size.error().is_some_and(|e| e.is_cancelled()));
//! ```
mod error;
mod pair;

pub mod bridge;
pub mod combinators;
pub mod dispatch;
pub mod present;

pub use combinators::{all, race, Settlement};
pub use dispatch::{Executor, Immediate, Job, RunLoop};
pub use error::{CancellableError, Error};
pub use pair::{pending, Future, FutureState, Resolver};

/// The producer side of a promise pair.
///
/// `new` returns the producer first and the thing to wait on second.
pub trait Promise<T>: Sized {
    type Waiter;

    fn new() -> (Self, Self::Waiter);

    fn fulfill(&self, value: T);

    fn reject(&self, error: Error);
}
