//! Turning callback-style APIs into [`Future`]s.
//!
//! Legacy APIs report their result through a pair of success / failure
//! callbacks or through a single completion handler taking an optional value
//! and an optional error. The wrappers here hand those callbacks a resolver
//! and return the future right away. Callbacks may fire any number of times;
//! only the first call counts.
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Error, Future};

pub type Fulfill<T> = Box<dyn Fn(T) + Send + Sync + 'static>;
pub type Reject = Box<dyn Fn(Error) + Send + Sync + 'static>;
pub type Completion<T> = Box<dyn Fn(Option<T>, Option<Error>) + Send + Sync + 'static>;

/// Wraps an operation that takes a success and a failure callback.
///
/// If the operation drops both callbacks without calling either, the future
/// rejects with [`Error::ResolverDropped`].
///
/// # Examples
///
/// ```
/// use pledge::bridge::wrap_callbacks;
///
/// let future = wrap_callbacks(|on_success, _on_failure| {
///     on_success(1);
///     // A buggy delegate reporting twice.
///     on_success(2);
/// });
/// assert_eq!(future.value(), Some(1));
/// ```
pub fn wrap_callbacks<T, F>(operation: F) -> Future<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(Fulfill<T>, Reject),
{
    Future::new(move |resolver| {
        let on_failure = resolver.clone();
        operation(
            Box::new(move |value: T| resolver.fulfill(value)),
            Box::new(move |error: Error| on_failure.reject(error)),
        )
    })
}

/// Wraps an operation that reports through one `(value, error)` completion
/// handler. An error wins over a value; neither rejects with
/// [`Error::InvalidCallingConvention`].
pub fn wrap_completion<T, F>(operation: F) -> Future<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(Completion<T>),
{
    Future::new(move |resolver| {
        operation(Box::new(move |value: Option<T>, error: Option<Error>| {
            match (value, error) {
                (_, Some(error)) => resolver.reject(error),
                (Some(value), None) => resolver.fulfill(value),
                (None, None) => resolver.reject(Error::InvalidCallingConvention),
            }
        }))
    })
}

/// Anything that can hand out a future for its eventual result.
pub trait Promisable {
    type Output: Clone + Send + 'static;

    fn produces_future(&self) -> Future<Self::Output>;
}

/// Identifies a handler held by a [`HandlerTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Owns callback handlers (delegates) for the duration of their operation.
///
/// The operation that fires the callback keeps the table; each handler lives
/// in it until released, either by hand or automatically when the future it
/// serves settles.
pub struct HandlerTable<H> {
    inner: Arc<Mutex<Table<H>>>,
}

struct Table<H> {
    next: u64,
    handlers: HashMap<Ticket, Arc<H>>,
}

impl<H> HandlerTable<H> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Table {
                next: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table<H>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handler: H) -> Ticket {
        let mut table = self.lock();
        let ticket = Ticket(table.next);
        table.next += 1;
        table.handlers.insert(ticket, Arc::new(handler));
        ticket
    }

    /// The handler behind `ticket`, if it is still held. The table lock is
    /// not held while the caller uses it, so the handler may settle futures.
    pub fn get(&self, ticket: Ticket) -> Option<Arc<H>> {
        self.lock().handlers.get(&ticket).cloned()
    }

    /// Removes the handler and gives it back to the caller.
    pub fn release(&self, ticket: Ticket) -> Option<Arc<H>> {
        self.lock().handlers.remove(&ticket)
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: Send + Sync + 'static> HandlerTable<H> {
    /// Holds `handler` until `future` settles, then releases it.
    pub fn hold_until_settled<T>(&self, future: &Future<T>, handler: H) -> Ticket
    where
        T: Clone + Send + 'static,
    {
        let ticket = self.insert(handler);
        let table = self.clone();
        future.on_settled(move |_| {
            if table.release(ticket).is_some() {
                tracing::trace!(?ticket, "released handler after settlement");
            }
        });
        ticket
    }
}

impl<H> Default for HandlerTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Clone for HandlerTable<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> Debug for HandlerTable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("held", &self.len())
            .finish()
    }
}
