//! Fixed-size worker pool with a barrier.
//!
//! Workers share a FIFO queue behind one mutex. The `work` condvar signals
//! "task queued or stop requested", the `idle` condvar signals "a worker
//! finished a task". Both waits use a timeout so a lost wakeup only costs one
//! poll interval.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::PoolConfig;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: VecDeque<Task>,
    idle: usize,
    stop: bool,
}

struct Shared {
    state: Mutex<State>,
    work: Condvar,
    idle: Condvar,
    threads: usize,
}

impl Shared {
    fn is_drained(&self, state: &State) -> bool {
        state.queue.is_empty() && state.idle == self.threads
    }
}

/// A pool of long-lived worker threads.
///
/// Tasks are closures run in submission order by whichever worker is free.
/// There is no cancellation: dropping the pool runs every queued task to
/// completion before the workers exit.
///
/// A task that panics is logged and discarded; the worker keeps serving the
/// queue.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use probemap::ThreadPool;
///
/// let pool = ThreadPool::new(4)?;
/// let hits = Arc::new(AtomicUsize::new(0));
/// for _ in 0..100 {
///     let hits = Arc::clone(&hits);
///     pool.add(move || {
///         hits.fetch_add(1, Ordering::Relaxed);
///     });
/// }
/// pool.wait();
/// assert_eq!(hits.load(Ordering::Relaxed), 100);
/// # Ok::<(), probemap::Error>(())
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                idle: threads,
                stop: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
            threads,
        });
        // Partially started pools are torn down by Drop.
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(threads),
        };
        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("probemap-worker-{index}"))
                .spawn(move || worker_loop(&shared, index))
                .map_err(|source| Error::Spawn { source })?;
            pool.workers.push(handle);
        }
        Ok(pool)
    }

    /// Start a pool sized by `config`.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        Self::new(config.threads)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.shared.threads
    }

    /// Queue `task` and wake one worker. Never blocks on running tasks.
    pub fn add<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        state.queue.push_back(Box::new(task));
        trace!("queued task ({} pending)", state.queue.len());
        drop(state);
        self.shared.work.notify_one();
    }

    /// Tasks queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Block until the queue is empty and every worker is idle.
    ///
    /// Calling this from inside a task deadlocks: the calling worker never
    /// becomes idle.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while !self.shared.is_drained(&state) {
            self.shared.idle.wait_for(&mut state, POLL_INTERVAL);
        }
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    let mut state = shared.state.lock();
    loop {
        if let Some(task) = state.queue.pop_front() {
            state.idle -= 1;
            MutexGuard::unlocked(&mut state, || run_task(task, index));
            state.idle += 1;
            if shared.is_drained(&state) {
                shared.idle.notify_all();
            }
            continue;
        }
        if state.stop {
            break;
        }
        shared.work.wait_for(&mut state, POLL_INTERVAL);
    }
    trace!("worker {index} exiting");
}

fn run_task(task: Task, index: usize) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!("pool worker {index}: task panicked: {}", panic_message(&*payload));
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.work.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("pool worker exited by panic");
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("pending", &self.pending())
            .finish()
    }
}
