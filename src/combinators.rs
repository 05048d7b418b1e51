//! Chaining, recovery and cleanup on top of [`Future`].
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::dispatch::Executor;
use crate::{pending, Error, Future, Resolver};

/// What a continuation may hand back: a plain `Result`, or another
/// [`Future`] whose outcome is adopted once it settles.
pub trait Settlement: 'static {
    type Output: Clone + Send + 'static;

    /// Settles `resolver` with this outcome, now or later.
    fn pipe(self, resolver: Resolver<Self::Output>);
}

impl<U, E> Settlement for Result<U, E>
where
    U: Clone + Send + 'static,
    E: Into<Error> + 'static,
{
    type Output = U;

    fn pipe(self, resolver: Resolver<U>) {
        resolver.settle(self.map_err(Into::into));
    }
}

impl<U: Clone + Send + 'static> Settlement for Future<U> {
    type Output = U;

    fn pipe(self, resolver: Resolver<U>) {
        self.on_settled(move |outcome| resolver.settle(outcome));
    }
}

fn run_guarded<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    catch_unwind(AssertUnwindSafe(f)).map_err(Error::from_panic)
}

fn continue_with<T, R, F>(
    transform: F,
    resolver: Resolver<R::Output>,
) -> impl FnOnce(Result<T, Error>) + Send + 'static
where
    T: Send + 'static,
    F: FnOnce(T) -> R + Send + 'static,
    R: Settlement,
{
    move |outcome| match outcome {
        Ok(value) => match run_guarded(move || transform(value)) {
            Ok(next) => next.pipe(resolver),
            Err(error) => resolver.reject(error),
        },
        Err(error) => resolver.reject(error),
    }
}

fn recover_with<T, R, F>(
    handler: F,
    resolver: Resolver<T>,
) -> impl FnOnce(Result<T, Error>) + Send + 'static
where
    T: Clone + Send + 'static,
    F: FnOnce(Error) -> R + Send + 'static,
    R: Settlement<Output = T>,
{
    move |outcome| match outcome {
        Ok(value) => resolver.fulfill(value),
        Err(error) => match run_guarded(move || handler(error)) {
            Ok(next) => next.pipe(resolver),
            Err(error) => resolver.reject(error),
        },
    }
}

fn finally_with<T, F>(
    action: F,
    resolver: Resolver<T>,
) -> impl FnOnce(Result<T, Error>) + Send + 'static
where
    T: Clone + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    move |outcome| {
        if let Err(error) = run_guarded(action) {
            tracing::error!(%error, "cleanup action panicked; passing the outcome through");
        }
        resolver.settle(outcome);
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Runs `transform` on the value once this future fulfills.
    ///
    /// `transform` returns either a `Result` or another `Future`; in the
    /// latter case the returned future settles only when that one does. A
    /// rejection of `self` skips `transform` and passes through unchanged,
    /// and a panic inside `transform` rejects with [`Error::Panicked`].
    ///
    /// # Examples
    ///
    /// ```
    /// use pledge::pending;
    ///
    /// let (reference, resolver) = pending::<&'static str>();
    /// let bytes = reference.then(|url| {
    ///     // Loading the asset is asynchronous too.
    ///     let (data, loaded) = pending::<Vec<u8>>();
    ///     loaded.fulfill(url.as_bytes().to_vec());
    ///     data
    /// });
    ///
    /// resolver.fulfill("assets-library://1");
    /// assert_eq!(bytes.value(), Some(b"assets-library://1".to_vec()));
    /// ```
    pub fn then<R, F>(&self, transform: F) -> Future<R::Output>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: Settlement,
    {
        let (future, resolver) = pending();
        self.on_settled(continue_with(transform, resolver));
        future
    }

    /// Like [`then`](Self::then), but `transform` is dispatched on `executor`.
    pub fn then_on<E, R, F>(&self, executor: &E, transform: F) -> Future<R::Output>
    where
        E: Executor + Clone + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        R: Settlement,
    {
        let (future, resolver) = pending();
        self.on_settled_on(executor, continue_with(transform, resolver));
        future
    }

    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Ok::<U, Error>(f(value)))
    }

    /// Turns a rejection back into an outcome. Fulfilled values pass through.
    pub fn recover<R, F>(&self, handler: F) -> Future<T>
    where
        F: FnOnce(Error) -> R + Send + 'static,
        R: Settlement<Output = T>,
    {
        let (future, resolver) = pending();
        self.on_settled(recover_with(handler, resolver));
        future
    }

    pub fn map_err<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.recover(move |error| Err::<T, Error>(f(error)))
    }

    /// Runs `action` exactly once when this future settles, whatever the
    /// outcome, and passes the outcome on unchanged.
    ///
    /// The action stays registered even if every handle to this future is
    /// dropped, so cleanup such as dismissing a presented surface still runs.
    pub fn always<F>(&self, action: F) -> Future<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (future, resolver) = pending();
        self.on_settled(finally_with(action, resolver));
        future
    }

    pub fn always_on<E, F>(&self, executor: &E, action: F) -> Future<T>
    where
        E: Executor + Clone + 'static,
        F: FnOnce() + Send + 'static,
    {
        let (future, resolver) = pending();
        self.on_settled_on(executor, finally_with(action, resolver));
        future
    }

    /// Terminal observer for the value.
    pub fn on_fulfilled<F>(&self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_settled(move |outcome| {
            if let Ok(value) = outcome {
                f(value)
            }
        });
    }

    /// Terminal observer for the error.
    pub fn on_rejected<F>(&self, f: F)
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_settled(move |outcome| {
            if let Err(error) = outcome {
                f(error)
            }
        });
    }
}

/// Settles with whichever future settles first.
///
/// A timeout is a race against a future that a timer rejects. An empty input
/// leaves nothing to settle the result and it rejects with
/// [`Error::ResolverDropped`].
pub fn race<T, I>(futures: I) -> Future<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let (future, resolver) = pending();
    for candidate in futures {
        let resolver = resolver.clone();
        candidate.on_settled(move |outcome| resolver.settle(outcome));
    }
    future
}

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every value, in input order, once all futures fulfill.
/// Rejects with the first rejection.
pub fn all<T, I>(futures: I) -> Future<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    if futures.is_empty() {
        return Future::fulfilled(Vec::new());
    }
    let (future, resolver) = pending();
    let gather = Arc::new(Mutex::new(Gather {
        values: vec![None; futures.len()],
        remaining: futures.len(),
    }));
    for (index, candidate) in futures.iter().enumerate() {
        let resolver = resolver.clone();
        let gather = gather.clone();
        candidate.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let done = {
                    let mut gather = gather.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(slot) = gather.values.get_mut(index) {
                        *slot = Some(value);
                    }
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        Some(gather.values.drain(..).flatten().collect::<Vec<T>>())
                    } else {
                        None
                    }
                };
                if let Some(values) = done {
                    resolver.fulfill(values);
                }
            }
            Err(error) => resolver.reject(error),
        });
    }
    future
}

#[cfg(test)]
mod tests {
    use super::{all, race};
    use crate::{pending, CancellableError, Error, Future, FutureState, RunLoop};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_then_transforms_value() {
        let (future, resolver) = pending::<i32>();
        let next = future.then(|v| Ok::<_, Error>(v.to_string()));
        resolver.fulfill(5);
        assert_eq!(next.value(), Some("5".to_string()));
    }

    #[test]
    fn test_then_flattens_inner_future() {
        let (outer, resolver) = pending::<i32>();
        let (inner, inner_resolver) = pending::<String>();
        let inner_handle = inner.clone();
        let chained = outer.then(move |_| inner_handle);
        resolver.fulfill(1);
        assert!(chained.is_pending());
        inner_resolver.fulfill("bytes".into());
        assert_eq!(chained.value(), Some("bytes".to_string()));
        drop(inner);
    }

    #[test]
    fn test_then_adopts_inner_rejection() {
        let domain = Error::msg("asset not found");
        let expected = domain.clone();
        let (a, resolver) = pending::<i32>();
        let chained = a.then(move |_| {
            let (b, b_resolver) = pending::<Vec<u8>>();
            b_resolver.reject(domain);
            b
        });
        resolver.fulfill(1);
        assert_eq!(chained.state(), FutureState::Rejected);
        assert_eq!(chained.error(), Some(expected));
    }

    #[test]
    fn test_rejection_skips_then_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (c1, c2) = (calls.clone(), calls.clone());
        let (future, resolver) = pending::<i32>();
        let end = future
            .then(move |v| {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(v + 1)
            })
            .map(move |v| {
                c2.fetch_add(1, Ordering::SeqCst);
                v * 2
            });
        resolver.reject(Error::msg("camera unavailable"));
        assert_eq!(end.error(), Some(Error::msg("camera unavailable")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_then_error_and_panic_reject() {
        let failed = Future::fulfilled(1).then(|_| Err::<i32, _>(Error::msg("no image found")));
        assert_eq!(failed.error(), Some(Error::msg("no image found")));

        let panicked = Future::fulfilled(1).then(|_| -> Result<i32, Error> { panic!("bad info") });
        assert_eq!(panicked.error(), Some(Error::Panicked("bad info".into())));
    }

    #[test]
    fn test_recover_and_map_err() {
        let recovered = Future::<i32>::rejected(Error::Cancelled).recover(|e| {
            if e.is_cancelled() {
                Ok::<_, Error>(0)
            } else {
                Err(e)
            }
        });
        assert_eq!(recovered.value(), Some(0));

        let untouched = Future::fulfilled(3).recover(|e| Err::<i32, _>(e));
        assert_eq!(untouched.value(), Some(3));

        let renamed = Future::<i32>::rejected(Error::msg("a")).map_err(|_| Error::msg("b"));
        assert_eq!(renamed.error(), Some(Error::msg("b")));
    }

    #[test]
    fn test_always_runs_once_per_outcome() {
        for outcome in [Ok(1), Err(Error::msg("failed")), Err(Error::Cancelled)] {
            let count = Arc::new(AtomicUsize::new(0));
            let c = count.clone();
            let (future, resolver) = pending::<i32>();
            let passed = future.always(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            resolver.settle(outcome.clone());
            resolver.settle(Ok(99));
            assert_eq!(count.load(Ordering::SeqCst), 1);
            assert_eq!(passed.outcome(), Some(outcome));
        }
    }

    #[test]
    fn test_always_runs_when_handle_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (future, resolver) = pending::<i32>();
        drop(future.always(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        drop(future);
        resolver.fulfill(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_always_panic_keeps_outcome() {
        let passed = Future::fulfilled(8).always(|| panic!("dismiss failed"));
        assert_eq!(passed.value(), Some(8));
    }

    #[test]
    fn test_three_always_and_cancellation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (future, resolver) = pending::<usize>();
        for _ in 0..3 {
            let c = counter.clone();
            let seen = seen.clone();
            future
                .always(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .on_rejected(move |e| seen.lock().unwrap().push(e.is_cancelled()));
        }
        resolver.reject(Error::Cancelled);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(*seen.lock().unwrap(), vec![true, true, true]);
    }

    #[test]
    fn test_then_on_run_loop_defers() {
        let run_loop = RunLoop::new();
        let (future, resolver) = pending::<i32>();
        let cleaned = Arc::new(AtomicUsize::new(0));
        let c = cleaned.clone();
        let chained = future
            .then_on(&run_loop, |v| Ok::<_, Error>(v + 1))
            .always_on(&run_loop, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        resolver.fulfill(1);
        assert!(chained.is_pending());
        assert_eq!(run_loop.turn(), 1);
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        assert_eq!(run_loop.run_until_idle(), 1);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(chained.value(), Some(2));
    }

    #[test]
    fn test_run_loop_cleanup_survives_panicking_observer() {
        let run_loop = RunLoop::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (future, resolver) = pending::<i32>();
        future.on_settled_on(&run_loop, |_| panic!("observer failed"));
        let passed = future.always_on(&run_loop, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        resolver.fulfill(1);
        assert_eq!(run_loop.run_until_idle(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(passed.value(), Some(1));
    }

    #[test]
    fn test_on_fulfilled_skips_rejection() {
        let got = Arc::new(Mutex::new(None));
        let g = got.clone();
        Future::fulfilled(4).on_fulfilled(move |v| *g.lock().unwrap() = Some(v));
        Future::<i32>::rejected(Error::msg("x")).on_fulfilled(|_| panic!("must not run"));
        assert_eq!(*got.lock().unwrap(), Some(4));
    }

    #[test]
    fn test_race_as_timeout() {
        let (slow, _keep) = pending::<&'static str>();
        let (timer, fire) = pending::<&'static str>();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            fire.reject(Error::msg("timed out"));
        });
        let raced = race([slow, timer]);
        assert_eq!(raced.wait(), Err(Error::msg("timed out")));
        task.join().expect("The timer thread has panicked");
    }

    #[test]
    fn test_race_first_wins() {
        let (a, ra) = pending::<i32>();
        let (b, rb) = pending::<i32>();
        let raced = race(vec![a, b]);
        rb.fulfill(2);
        ra.fulfill(1);
        assert_eq!(raced.value(), Some(2));
        assert_eq!(race(Vec::<Future<i32>>::new()).error(), Some(Error::ResolverDropped));
    }

    #[test]
    fn test_all_keeps_input_order() {
        let (a, ra) = pending::<i32>();
        let (b, rb) = pending::<i32>();
        let joined = all([a, b, Future::fulfilled(3)]);
        rb.fulfill(2);
        assert!(joined.is_pending());
        ra.fulfill(1);
        assert_eq!(joined.value(), Some(vec![1, 2, 3]));
        assert_eq!(all(Vec::<Future<i32>>::new()).value(), Some(vec![]));
    }

    #[test]
    fn test_all_rejects_on_first_error() {
        let (a, ra) = pending::<i32>();
        let (b, _rb) = pending::<i32>();
        let joined = all([a, b]);
        ra.reject(Error::Cancelled);
        assert_eq!(joined.error(), Some(Error::Cancelled));
    }
}
