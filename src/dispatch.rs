//! Execution contexts for continuations.
//!
//! By default a continuation runs on whichever thread settles the future, or
//! on the registering thread when the future has already settled. Passing an
//! [`Executor`] to one of the `*_on` combinators hands the continuation to that
//! executor instead.
use std::collections::VecDeque;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::Error;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Any `Fn(Job)` closure is an executor, e.g. `|job| { std::thread::spawn(job); }`.
impl<F> Executor for F
where
    F: Fn(Job) + Send + Sync,
{
    fn execute(&self, job: Job) {
        self(job)
    }
}

/// Runs every job inline, on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Executor for Immediate {
    fn execute(&self, job: Job) {
        job()
    }
}

/// A FIFO queue of jobs that only run when the owner turns the loop.
///
/// This stands in for "the next turn of the event loop": continuations
/// dispatched here never run on the settling thread's stack, so long chains
/// don't grow the stack and ordering is fully under the owner's control.
///
/// # Examples
///
/// ```
/// use pledge::{pending, RunLoop};
///
/// let run_loop = RunLoop::new();
/// let (future, resolver) = pending::<i32>();
/// let doubled = future.then_on(&run_loop, |v| Ok::<_, pledge::Error>(v * 2));
///
/// resolver.fulfill(21);
/// assert!(doubled.is_pending());
///
/// run_loop.run_until_idle();
/// assert_eq!(doubled.value(), Some(42));
/// ```
#[derive(Clone, Default)]
pub struct RunLoop {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl RunLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the jobs queued at the moment of the call. Jobs queued while
    /// turning wait for the next turn. Returns how many jobs ran.
    pub fn turn(&self) -> usize {
        let jobs: Vec<Job> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.drain(..).collect()
        };
        let count = jobs.len();
        for job in jobs {
            // One failing job must not drop the rest of the batch.
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                let error = Error::from_panic(payload);
                tracing::error!(%error, "run loop job panicked");
            }
        }
        count
    }

    /// Turns the loop until no jobs are left. Returns how many jobs ran.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Executor for RunLoop {
    fn execute(&self, job: Job) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }
}

impl Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop").field("queued", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Executor, Immediate, Job, RunLoop};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_immediate_runs_inline() {
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        Immediate.execute(Box::new(move || *h.lock().unwrap() += 1));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_run_loop_is_fifo_and_turn_based() {
        let run_loop = RunLoop::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            let inner_loop = run_loop.clone();
            run_loop.execute(Box::new(move || {
                log.lock().unwrap().push(i);
                if i == 0 {
                    let log = log.clone();
                    inner_loop.execute(Box::new(move || log.lock().unwrap().push(10)));
                }
            }));
        }
        assert_eq!(run_loop.len(), 3);
        assert_eq!(run_loop.turn(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(run_loop.run_until_idle(), 1);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 10]);
        assert!(run_loop.is_empty());
    }

    #[test]
    fn test_panicking_job_keeps_batch_running() {
        let run_loop = RunLoop::new();
        let hits = Arc::new(Mutex::new(0));
        run_loop.execute(Box::new(|| panic!("delegate went away")));
        let h = hits.clone();
        run_loop.execute(Box::new(move || *h.lock().unwrap() += 1));
        assert_eq!(run_loop.turn(), 2);
        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(run_loop.is_empty());
    }

    #[test]
    fn test_closure_executor() {
        let spawner = |job: Job| {
            std::thread::spawn(job).join().expect("job thread panicked");
        };
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        spawner.execute(Box::new(move || *h.lock().unwrap() += 1));
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
