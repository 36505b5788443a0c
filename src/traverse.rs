//! Parallel traversal of a table's occupied slots.
//!
//! The slot range `[0, capacity)` is split into contiguous chunks, one pool
//! task per chunk. Each task folds its chunk into a fresh partial accumulator,
//! then merges the partial into the shared result under a lock. The last chunk
//! to merge fulfils the [`TraverseHandle`].
//!
//! Chunks merge in no particular order, so the merge must be commutative and
//! associative for the result to be deterministic.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::pool::{panic_message, ThreadPool};
use crate::storage::SlotStore;
use crate::table::Table;

impl<KS: SlotStore, VS: SlotStore, S> Table<KS, VS, S> {
    /// Fold every occupied slot, in slot order.
    pub fn fold<'t, P>(&'t self, acc: P, visit: impl FnMut(&mut P, KS::Ref<'t>, VS::Ref<'t>)) -> P {
        self.fold_range(0..self.capacity(), acc, visit)
    }

    /// Fold the occupied slots whose index lies in `range`.
    ///
    /// # Panics
    /// Panics if `range` extends past the capacity.
    pub fn fold_range<'t, P>(
        &'t self,
        range: Range<usize>,
        mut acc: P,
        mut visit: impl FnMut(&mut P, KS::Ref<'t>, VS::Ref<'t>),
    ) -> P {
        for (key, value) in self.iter_slots(range) {
            visit(&mut acc, key, value);
        }
        acc
    }
}

/// Split `0..capacity` into `n` contiguous ranges; the first `capacity % n`
/// ranges get one extra slot.
pub(crate) fn chunk_ranges(capacity: usize, n: usize) -> impl Iterator<Item = Range<usize>> {
    let base = capacity / n;
    let extra = capacity % n;
    let mut start = 0;
    (0..n).map(move |i| {
        let len = base + usize::from(i < extra);
        let range = start..start + len;
        start += len;
        range
    })
}

// =============================================================================
// Result handle
// =============================================================================

struct Promise<R> {
    slot: Mutex<Option<Result<R>>>,
    ready: Condvar,
}

impl<R> Promise<R> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fulfil(&self, result: Result<R>) {
        *self.slot.lock() = Some(result);
        self.ready.notify_all();
    }
}

/// Pending result of [`parallel_traverse`].
pub struct TraverseHandle<R> {
    promise: Arc<Promise<R>>,
}

impl<R> TraverseHandle<R> {
    fn ready(result: Result<R>) -> Self {
        let promise = Promise::new();
        promise.fulfil(result);
        Self {
            promise: Arc::new(promise),
        }
    }

    /// True once every chunk has merged.
    pub fn is_ready(&self) -> bool {
        self.promise.slot.lock().is_some()
    }

    /// Block until every chunk has merged and return the final accumulator.
    ///
    /// Fails with [`Error::TaskPanicked`] if any callback panicked. There is
    /// no timeout: a callback that never returns blocks this forever.
    pub fn wait(self) -> Result<R> {
        let mut slot = self.promise.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.promise.ready.wait(&mut slot);
        }
    }
}

impl<R> std::fmt::Debug for TraverseHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraverseHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}

// =============================================================================
// Traversal
// =============================================================================

struct MergeState<R> {
    acc: Option<R>,
    remaining: usize,
    panics: usize,
}

struct Job<I, F, M, R> {
    init: I,
    visit: F,
    merge: M,
    state: Mutex<MergeState<R>>,
    promise: Arc<Promise<R>>,
}

impl<I, F, M, R> Job<I, F, M, R> {
    /// Record one finished chunk; the last one fulfils the promise.
    fn finish_chunk<P>(&self, partial: Option<P>)
    where
        M: Fn(&mut R, P),
    {
        let mut state = self.state.lock();
        if let Some(partial) = partial {
            let merged = match state.acc.as_mut() {
                Some(acc) => panic::catch_unwind(AssertUnwindSafe(|| (self.merge)(acc, partial))),
                None => Ok(()),
            };
            if let Err(payload) = merged {
                warn!("traversal merge panicked: {}", panic_message(&*payload));
                state.panics += 1;
            }
        } else {
            state.panics += 1;
        }

        state.remaining -= 1;
        if state.remaining > 0 {
            return;
        }
        let result = match state.acc.take() {
            Some(acc) if state.panics == 0 => Ok(acc),
            _ => Err(Error::TaskPanicked {
                panics: state.panics,
            }),
        };
        drop(state);
        self.promise.fulfil(result);
    }
}

/// Fold `table` in parallel on `pool`.
///
/// - `threads`: number of chunks; defaults to the pool size. Always capped at
///   the number of entries and at least one.
/// - `init`: builds each chunk's partial accumulator.
/// - `visit`: applied to the partial for every occupied slot in the chunk.
/// - `merge`: folds a finished partial into the final accumulator, which
///   starts as `acc`.
///
/// The table is shared read-only with the workers for the duration.
///
/// ```
/// use std::sync::Arc;
/// use probemap::{parallel_traverse, FlatHashMap, ThreadPool};
///
/// let mut m: FlatHashMap<u64, u64> = FlatHashMap::new();
/// for k in 0..1000 {
///     m.insert(k, k * 2)?;
/// }
/// let table = Arc::new(m);
/// let pool = ThreadPool::new(4)?;
/// let sum = parallel_traverse(
///     &table,
///     &pool,
///     None,
///     u64::default,
///     |acc: &mut u64, _key: &u64, value: &u64| *acc += value,
///     |total: &mut u64, partial: u64| *total += partial,
///     0u64,
/// )
/// .wait()?;
/// assert_eq!(sum, 999 * 1000);
/// # Ok::<(), probemap::Error>(())
/// ```
pub fn parallel_traverse<KS, VS, S, P, R, I, F, M>(
    table: &Arc<Table<KS, VS, S>>,
    pool: &ThreadPool,
    threads: Option<usize>,
    init: I,
    visit: F,
    merge: M,
    acc: R,
) -> TraverseHandle<R>
where
    KS: SlotStore + Send + Sync + 'static,
    VS: SlotStore + Send + Sync + 'static,
    S: Send + Sync + 'static,
    P: 'static,
    R: Send + 'static,
    I: Fn() -> P + Send + Sync + 'static,
    F: for<'a> Fn(&mut P, KS::Ref<'a>, VS::Ref<'a>) + Send + Sync + 'static,
    M: Fn(&mut R, P) + Send + Sync + 'static,
{
    if table.is_empty() {
        return TraverseHandle::ready(Ok(acc));
    }
    let capacity = table.capacity();
    let chunks = threads
        .unwrap_or_else(|| pool.threads())
        .min(table.len())
        .min(capacity)
        .max(1);
    debug!("traversing {} entries over {capacity} slots in {chunks} chunks", table.len());

    let promise = Arc::new(Promise::new());
    let job = Arc::new(Job {
        init,
        visit,
        merge,
        state: Mutex::new(MergeState {
            acc: Some(acc),
            remaining: chunks,
            panics: 0,
        }),
        promise: Arc::clone(&promise),
    });

    for range in chunk_ranges(capacity, chunks) {
        let job = Arc::clone(&job);
        let table = Arc::clone(table);
        pool.add(move || {
            let partial = panic::catch_unwind(AssertUnwindSafe(|| {
                let partial = (job.init)();
                table.fold_range(range.clone(), partial, |p, k, v| (job.visit)(p, k, v))
            }));
            match partial {
                Ok(partial) => job.finish_chunk(Some(partial)),
                Err(payload) => {
                    warn!(
                        "traversal of slots {range:?} panicked: {}",
                        panic_message(&*payload)
                    );
                    job.finish_chunk::<P>(None);
                }
            }
        });
    }

    TraverseHandle { promise }
}
