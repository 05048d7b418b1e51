use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::dispatch::Executor;
use crate::{CancellableError, Error, Promise};

/// A callback waiting for the outcome of a [`Future`].
pub(crate) type Observer<T> = Box<dyn FnOnce(Result<T, Error>) + Send + 'static>;

/// Where a [`Future`] is in its life. Moves from `Pending` to one of the
/// other two exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FutureState {
    Pending,
    Fulfilled,
    Rejected,
}

/// A read-only handle to a value that will be known later.
///
/// Cloning a `Future` is cheap; every clone observes the same outcome. Any
/// number of observers may be registered, and the `Future` can be awaited
/// like any other [`std::future::Future`].
///
/// # Examples
///
/// ```
/// use pledge::pending;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (future, resolver) = pending::<String>();
/// let task = thread::spawn(move || resolver.fulfill("🍓".into()));
///
/// assert_eq!(block_on(future), Ok("🍓".to_string()));
/// task.join().expect("The resolver thread has panicked");
/// ```
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

/// The write side of a [`Future`]. Only the first settlement has any effect.
///
/// Clones share the same slot, so a legacy API with separate success and
/// failure callbacks can hand one clone to each. When the last clone is
/// dropped while the future is still pending, the future rejects with
/// [`Error::ResolverDropped`].
pub struct Resolver<T> {
    slot: Arc<Slot<T>>,
}

struct Slot<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) struct Shared<T> {
    inner: Mutex<Inner<T>>,
}

enum State<T> {
    Pending(Vec<Observer<T>>),
    Settled(Result<T, Error>),
}

struct Inner<T> {
    state: State<T>,
    wakers: Vec<Waker>,
    // Live `Future` handles.
    handles: usize,
    // Set once anything has looked at, or asked to see, the outcome.
    observed: bool,
}

/// Creates a pending [`Future`] and the [`Resolver`] that settles it.
pub fn pending<T>() -> (Future<T>, Resolver<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            state: State::Pending(Vec::new()),
            wakers: Vec::new(),
            handles: 0,
            observed: false,
        }),
    });
    let resolver = Resolver {
        slot: Arc::new(Slot {
            shared: shared.clone(),
        }),
    };
    (Future::from_shared(shared), resolver)
}

/// Runs one observer. A panicking observer must not keep the ones queued
/// after it from running.
fn notify<T>(observer: Observer<T>, outcome: Result<T, Error>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || observer(outcome))) {
        let error = Error::from_panic(payload);
        tracing::error!(%error, "future observer panicked");
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Observers and wakers run after the lock is released. Only `T::clone`
        // runs under it, and always before the state is changed, so a poisoned
        // lock still holds a consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settles with an error. Needs no `T: Clone`, so `Drop` can use it.
    fn reject(&self, error: Error) -> bool {
        let (observers, wakers) = {
            let mut inner = self.lock();
            if let State::Settled(_) = inner.state {
                return false;
            }
            let previous =
                std::mem::replace(&mut inner.state, State::Settled(Err(error.clone())));
            let wakers = std::mem::take(&mut inner.wakers);
            match previous {
                State::Pending(observers) => (observers, wakers),
                State::Settled(_) => unreachable!("checked above"),
            }
        };
        tracing::trace!(%error, observers = observers.len(), "future rejected");
        for waker in wakers {
            waker.wake();
        }
        for observer in observers {
            notify(observer, Err(error.clone()));
        }
        true
    }

    fn is_pending(&self) -> bool {
        matches!(self.lock().state, State::Pending(_))
    }
}

impl<T: Clone> Shared<T> {
    fn fulfill(&self, value: T) -> bool {
        let stored = value.clone();
        let (observers, wakers) = {
            let mut inner = self.lock();
            if let State::Settled(_) = inner.state {
                return false;
            }
            let previous = std::mem::replace(&mut inner.state, State::Settled(Ok(stored)));
            let wakers = std::mem::take(&mut inner.wakers);
            match previous {
                State::Pending(observers) => (observers, wakers),
                State::Settled(_) => unreachable!("checked above"),
            }
        };
        tracing::trace!(observers = observers.len(), "future fulfilled");
        for waker in wakers {
            waker.wake();
        }
        for observer in observers {
            notify(observer, Ok(value.clone()));
        }
        true
    }

    /// Queues `observer`, or runs it right away when already settled. The
    /// decision is made under the lock; the call happens outside of it.
    fn subscribe(&self, observer: Observer<T>) {
        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.observed = true;
            match &mut inner.state {
                State::Pending(observers) => {
                    observers.push(observer);
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        notify(observer, outcome);
    }

    fn outcome(&self) -> Option<Result<T, Error>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match &inner.state {
            State::Pending(_) => None,
            State::Settled(outcome) => {
                let outcome = outcome.clone();
                inner.observed = true;
                Some(outcome)
            }
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let State::Settled(Err(error)) = &inner.state {
            if !inner.observed && !error.is_cancelled() {
                tracing::warn!(%error, "future rejected but its outcome was never observed");
            }
        }
    }
}

impl<T> Future<T> {
    fn from_shared(shared: Arc<Shared<T>>) -> Self {
        shared.lock().handles += 1;
        Self { shared }
    }

    pub fn state(&self) -> FutureState {
        match &self.shared.lock().state {
            State::Pending(_) => FutureState::Pending,
            State::Settled(Ok(_)) => FutureState::Fulfilled,
            State::Settled(Err(_)) => FutureState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    /// A future that is already rejected with `error`.
    pub fn rejected(error: Error) -> Self {
        let (future, resolver) = pending();
        resolver.slot.shared.reject(error);
        future
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Runs `producer` right away with the resolver for a new future and
    /// returns that future. A panic inside `producer` rejects the future.
    ///
    /// # Examples
    ///
    /// ```
    /// use pledge::{Future, Error};
    ///
    /// let future = Future::new(|resolver| resolver.fulfill(7));
    /// assert_eq!(future.value(), Some(7));
    ///
    /// let failed = Future::<i32>::new(|_| panic!("lost the delegate"));
    /// assert_eq!(failed.error(), Some(Error::Panicked("lost the delegate".into())));
    /// ```
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let (future, resolver) = pending();
        let fallback = resolver.clone();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || producer(resolver))) {
            fallback.reject(Error::from_panic(payload));
        }
        future
    }

    /// A future that is already fulfilled with `value`.
    pub fn fulfilled(value: T) -> Self {
        let (future, resolver) = pending();
        resolver.fulfill(value);
        future
    }

    /// Registers `observer` to receive the outcome, exactly once. Observers
    /// registered while pending run in registration order on the settling
    /// thread; observers registered after settlement run immediately.
    pub fn on_settled<F>(&self, observer: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.shared.subscribe(Box::new(observer));
    }

    /// Like [`on_settled`](Self::on_settled), but the observer is handed to
    /// `executor` instead of running inline.
    pub fn on_settled_on<E, F>(&self, executor: &E, observer: F)
    where
        E: Executor + Clone + 'static,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let executor = executor.clone();
        self.shared.subscribe(Box::new(move |outcome| {
            executor.execute(Box::new(move || notify(Box::new(observer), outcome)));
        }));
    }

    /// The outcome, if settled.
    pub fn outcome(&self) -> Option<Result<T, Error>> {
        self.shared.outcome()
    }

    /// The value, if fulfilled.
    pub fn value(&self) -> Option<T> {
        self.outcome().and_then(Result::ok)
    }

    /// The error, if rejected.
    pub fn error(&self) -> Option<Error> {
        self.outcome().and_then(Result::err)
    }

    /// Blocks the current thread until the future settles.
    pub fn wait(&self) -> Result<T, Error> {
        futures::executor::block_on(self.clone())
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self::from_shared(self.shared.clone())
    }
}

impl<T> Drop for Future<T> {
    /// Wakers are only useful to tasks holding a handle, so the last handle
    /// takes any left behind by tasks that stopped polling.
    fn drop(&mut self) {
        let stale = {
            let mut inner = self.shared.lock();
            inner.handles -= 1;
            if inner.handles == 0 {
                std::mem::take(&mut inner.wakers)
            } else {
                Vec::new()
            }
        };
        drop(stale);
    }
}

impl<T> Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").field("state", &self.state()).finish()
    }
}

impl<T: Clone> std::future::Future for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        inner.observed = true;
        match &inner.state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending(_) => {
                // Several clones may be awaited from different tasks, so every
                // distinct waker is kept.
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Resolver<T> {
    pub fn reject(&self, error: Error) {
        if !self.slot.shared.reject(error) {
            tracing::debug!("ignored rejection of an already settled future");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.shared.is_pending()
    }

    /// True when no `Future` handle, observer or awaiting task is left. A
    /// producer may use this to skip work nobody will see.
    pub fn is_abandoned(&self) -> bool {
        let inner = self.slot.shared.lock();
        let queued = match &inner.state {
            State::Pending(observers) => observers.len(),
            State::Settled(_) => 0,
        };
        inner.handles == 0 && queued == 0
    }
}

impl<T: Clone> Resolver<T> {
    pub fn fulfill(&self, value: T) {
        if !self.slot.shared.fulfill(value) {
            tracing::debug!("ignored fulfillment of an already settled future");
        }
    }

    pub fn settle(&self, outcome: Result<T, Error>) {
        match outcome {
            Ok(value) => self.fulfill(value),
            Err(error) => self.reject(error),
        }
    }
}

impl<T: Clone> Promise<T> for Resolver<T> {
    type Waiter = Future<T>;

    fn new() -> (Self, Self::Waiter) {
        let (future, resolver) = pending();
        (resolver, future)
    }

    fn fulfill(&self, value: T) {
        Resolver::fulfill(self, value)
    }

    fn reject(&self, error: Error) {
        Resolver::reject(self, error)
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<T> Drop for Slot<T> {
    /// If every resolver is gone without settling, reject so observers are
    /// released instead of waiting forever.
    fn drop(&mut self) {
        if self.shared.reject(Error::ResolverDropped) {
            tracing::debug!("resolver dropped before settling");
        }
    }
}
