//! The request container: payload, callable queue, results and state flags.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use super::handle::ExecutionHandle;
use super::outcome::{ExecutionContext, Outcome};
use crate::context::EngineContext;
use crate::error::EngineError;

const STARTED: u8 = 1 << 0;
const ERROR: u8 = 1 << 1;

/// A deferred unit of work operating on a request.
pub type Callable<T> = Box<dyn FnOnce(&Request<T>) -> Outcome + Send + 'static>;

/// Generic unit-of-work container.
///
/// `Request` is a cheap handle over shared state: clones refer to the same
/// request. Callables receive a reference to it and may read or mutate the
/// payload through [`Request::data`].
pub struct Request<T> {
    pub(super) inner: Arc<RequestInner<T>>,
}

pub(super) struct RequestInner<T> {
    pub(super) id: AtomicU64,
    pub(super) payload: Mutex<T>,
    pub(super) callables: Mutex<Vec<Callable<T>>>,
    pub(super) results: Mutex<Vec<Outcome>>,
    pub(super) in_flight: AtomicUsize,
    pub(super) state: AtomicU8,
    pub(super) context: AtomicU8,
    pub(super) handle: Mutex<ExecutionHandle>,
    /// Batch drained by `execute` but not yet handed to its strategy.
    pub(super) deferred: Mutex<Option<Vec<Callable<T>>>>,
    pub(super) max_age: AtomicU64,
    pub(super) disposed: AtomicBool,
    pub(super) engine: Weak<EngineContext>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id())
            .field("started", &self.started())
            .field("in_flight", &self.in_flight())
            .field("context", &self.context())
            .finish()
    }
}

impl<T: Default + Send + 'static> Request<T> {
    pub(crate) fn new(engine: Weak<EngineContext>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id: AtomicU64::new(0),
                payload: Mutex::new(T::default()),
                callables: Mutex::new(Vec::new()),
                results: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                state: AtomicU8::new(0),
                context: AtomicU8::new(ExecutionContext::Default.to_u8()),
                handle: Mutex::new(ExecutionHandle::None),
                deferred: Mutex::new(None),
                max_age: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                engine,
            }),
        }
    }

    /// Return the request to its newly constructed state.
    pub(crate) fn reset(&self) {
        let inner = &self.inner;
        inner.callables.lock().clear();
        inner.results.lock().clear();
        *inner.payload.lock() = T::default();
        *inner.handle.lock() = ExecutionHandle::None;
        *inner.deferred.lock() = None;
        inner.in_flight.store(0, Ordering::SeqCst);
        inner.state.store(0, Ordering::SeqCst);
        inner.context.store(ExecutionContext::Default.to_u8(), Ordering::SeqCst);
        inner.max_age.store(0, Ordering::SeqCst);
        inner.disposed.store(false, Ordering::SeqCst);
    }
}

impl<T> Request<T> {
    /// Identity of the current checkout; changes every time the pool hands
    /// the instance out again.
    pub fn id(&self) -> u64 {
        self.inner.id.load(Ordering::Acquire)
    }

    pub(crate) fn assign_id(&self, id: u64) {
        self.inner.id.store(id, Ordering::Release);
    }

    /// Lock and return the payload.
    pub fn data(&self) -> MutexGuard<'_, T> {
        self.inner.payload.lock()
    }

    /// Replace the payload wholesale.
    pub fn set_data(&self, payload: T) {
        *self.inner.payload.lock() = payload;
    }

    /// Queue a callable for the next `execute`.
    ///
    /// Rejected once the request has started: the queue of a dispatched
    /// request has already been consumed.
    pub fn enqueue<F>(&self, callable: F) -> Result<(), EngineError>
    where
        F: FnOnce(&Request<T>) -> Outcome + Send + 'static,
    {
        if self.started() {
            return Err(EngineError::AlreadyDispatched { id: self.id() });
        }
        self.inner.callables.lock().push(Box::new(callable));
        Ok(())
    }

    /// Number of callables waiting for `execute`.
    pub fn queued(&self) -> usize {
        self.inner.callables.lock().len()
    }

    pub fn started(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) & STARTED == STARTED
    }

    pub(super) fn mark_started(&self) {
        self.inner.state.fetch_or(STARTED, Ordering::AcqRel);
    }

    /// Flag the request as failed independently of any callable result.
    pub fn set_error(&self) {
        self.inner.state.fetch_or(ERROR, Ordering::AcqRel);
    }

    /// True if the error flag is set or any posted result carries `Error`.
    pub fn error(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) & ERROR == ERROR
            || self.inner.results.lock().iter().any(|r| r.is_error())
    }

    /// Callables dispatched that have not posted a result yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// `started`, nothing in flight, and every posted result completed.
    pub fn completed(&self) -> bool {
        if !self.started() {
            return false;
        }
        if self.in_flight() != 0 {
            return false;
        }
        self.inner.results.lock().iter().all(|r| r.is_completed())
    }

    /// Snapshot of posted results, in completion order.
    pub fn results(&self) -> Vec<Outcome> {
        self.inner.results.lock().clone()
    }

    pub fn result_count(&self) -> usize {
        self.inner.results.lock().len()
    }

    /// Context chosen by the last `execute`, `Default` if never executed.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::from_u8(self.inner.context.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Per-request age threshold in ticks; 0 falls back to the engine default.
    pub fn max_age(&self) -> u64 {
        self.inner.max_age.load(Ordering::Acquire)
    }

    pub fn set_max_age(&self, ticks: u64) {
        self.inner.max_age.store(ticks, Ordering::Release);
    }

    pub(crate) fn engine(&self) -> Result<Arc<EngineContext>, EngineError> {
        self.inner.engine.upgrade().ok_or(EngineError::EngineDropped)
    }

    /// Claim the single disposal of this checkout.
    pub(crate) fn mark_disposed(&self) -> bool {
        self.inner
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same underlying request.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Callable that does nothing and reports `Completed`.
pub fn dont_care<T>(_: &Request<T>) -> Outcome {
    Outcome::Completed
}
