//! Shared engine state injected into requests, the pool and the coordinator.
//!
//! Requests hold a `Weak` reference to this context; the coordinator owns the
//! only strong ones, so dropping the coordinator tears the engine down even
//! while recycled requests sit in the pool.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam::queue::SegQueue;

use crate::error::EngineError;
use crate::lifecycle::{InFlightRegistry, LifecycleState};
use crate::pool::RequestPool;
use crate::request::ExecutionContext;
use crate::scheduler::{ChainScheduler, WorkerPool};

/// Deferred action run by the coordinator's tick loop.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Lock-free FIFO of deferred actions.
#[derive(Default)]
pub(crate) struct ActionQueue {
    actions: SegQueue<Action>,
}

impl ActionQueue {
    pub(crate) fn push(&self, action: Action) {
        self.actions.push(action);
    }

    /// Run queued actions until the queue is empty, including any queued by
    /// the actions themselves. Returns the number run.
    pub(crate) fn run_all(&self) -> usize {
        let mut ran = 0;
        while let Some(action) = self.actions.pop() {
            action();
            ran += 1;
        }
        ran
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}

/// Monotonic counters surfaced through `CoordinatorStats`.
#[derive(Default)]
pub(crate) struct EngineCounters {
    pub(crate) created: AtomicU64,
    pub(crate) recycled: AtomicU64,
    pub(crate) aged_completions: AtomicU64,
    pub(crate) drained_completions: AtomicU64,
    pub(crate) callable_failures: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

pub(crate) struct EngineContext {
    pub(crate) workers: Arc<WorkerPool>,
    pub(crate) chains: ChainScheduler,
    pub(crate) main_thread_actions: ActionQueue,
    pub(crate) frame_boundary_actions: ActionQueue,
    pub(crate) registry: InFlightRegistry,
    pub(crate) pool: RequestPool,
    pub(crate) counters: EngineCounters,
    owner: ThreadId,
    default_context: AtomicU8,
    max_parallelism: AtomicUsize,
    max_request_age: AtomicU64,
    executing: AtomicUsize,
    state: AtomicU8,
    notification_sent: AtomicBool,
    frame: AtomicU64,
    next_request_id: AtomicU64,
}

impl EngineContext {
    pub(crate) fn new(
        workers: Arc<WorkerPool>,
        default_context: ExecutionContext,
        max_parallelism: usize,
        max_request_age: u64,
    ) -> Self {
        Self {
            chains: ChainScheduler::new(workers.clone()),
            workers,
            main_thread_actions: ActionQueue::default(),
            frame_boundary_actions: ActionQueue::default(),
            registry: InFlightRegistry::new(),
            pool: RequestPool::new(),
            counters: EngineCounters::default(),
            owner: thread::current().id(),
            default_context: AtomicU8::new(default_context.to_u8()),
            max_parallelism: AtomicUsize::new(max_parallelism),
            max_request_age: AtomicU64::new(max_request_age),
            executing: AtomicUsize::new(0),
            state: AtomicU8::new(LifecycleState::Running.to_u8()),
            notification_sent: AtomicBool::new(false),
            frame: AtomicU64::new(0),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Substitute the default for an unspecified context, and force
    /// `Immediate` once shutdown has been requested.
    pub(crate) fn resolve_context(&self, requested: ExecutionContext) -> Result<ExecutionContext, EngineError> {
        let context = match requested {
            ExecutionContext::Default => self.default_context()?,
            other => other,
        };
        if context == ExecutionContext::Default {
            return Err(EngineError::UnsupportedContext(context.to_string()));
        }
        if self.shutdown_requested() {
            return Ok(ExecutionContext::Immediate);
        }
        Ok(context)
    }

    pub(crate) fn default_context(&self) -> Result<ExecutionContext, EngineError> {
        ExecutionContext::from_u8(self.default_context.load(Ordering::Acquire))
    }

    pub(crate) fn set_default_context(&self, context: ExecutionContext) {
        self.default_context.store(context.to_u8(), Ordering::Release);
    }

    pub(crate) fn max_parallelism(&self) -> usize {
        self.max_parallelism.load(Ordering::Acquire)
    }

    pub(crate) fn set_max_parallelism(&self, value: usize) {
        self.max_parallelism.store(value, Ordering::Release);
    }

    pub(crate) fn max_request_age(&self) -> u64 {
        self.max_request_age.load(Ordering::Acquire)
    }

    pub(crate) fn set_max_request_age(&self, value: u64) {
        self.max_request_age.store(value, Ordering::Release);
    }

    pub(crate) fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Mark a callable as executing until the returned guard drops.
    pub(crate) fn enter_callable(&self) -> ExecutingGuard<'_> {
        self.executing.fetch_add(1, Ordering::SeqCst);
        ExecutingGuard { counter: &self.executing }
    }

    /// True while any callable is running anywhere in the engine.
    pub(crate) fn inside_callable(&self) -> bool {
        self.executing.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Move `from` -> `to` only if currently in `from`.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.state() != LifecycleState::Running
    }

    pub(crate) fn notification_sent(&self) -> bool {
        self.notification_sent.load(Ordering::Acquire)
    }

    pub(crate) fn mark_notification_sent(&self) {
        self.notification_sent.store(true, Ordering::Release);
    }

    pub(crate) fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub(crate) fn advance_frame(&self) -> u64 {
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// RAII guard for the executing-callable nesting counter.
pub(crate) struct ExecutingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
