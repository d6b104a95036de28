//! Execute, complete, and the four dispatch strategies.
//!
//! Every batch that runs synchronously (immediate, frame-boundary, or a forced
//! join) goes through the `deferred` slot and runs while holding its lock. A
//! concurrent `complete` therefore blocks until the batch has finished
//! instead of observing a half-run request.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::body::{Callable, Request};
use super::handle::{CountdownLatch, ExecutionHandle};
use super::outcome::{ExecutionContext, Outcome};
use crate::context::{EngineContext, EngineCounters};
use crate::error::EngineError;
use crate::lifecycle::Tracked;
use crate::scheduler::TaskHandle;
use crate::telemetry;

impl<T: Default + Send + 'static> Request<T> {
    /// Dispatch every queued callable under `context`.
    ///
    /// An empty queue marks the request started and returns: it is trivially
    /// complete with zero results. `ExecutionContext::Default` resolves to the
    /// engine default; after shutdown has been requested every context is
    /// forced to `Immediate`.
    pub fn execute(&self, context: ExecutionContext) -> Result<(), EngineError> {
        if self.inner.callables.lock().is_empty() {
            self.mark_started();
            return Ok(());
        }

        let engine = self.engine()?;
        let context = engine.resolve_context(context)?;
        let _span = telemetry::request_span(self.id(), context).entered();

        // Holding the handle lock publishes dispatch atomically to `complete`.
        let mut handle = self.inner.handle.lock();
        let batch = std::mem::take(&mut *self.inner.callables.lock());
        let count = batch.len();
        self.inner.context.store(context.to_u8(), Ordering::Release);
        self.inner.in_flight.fetch_add(count, Ordering::AcqRel);
        self.mark_started();
        if count == 0 {
            return Ok(());
        }

        tracing::debug!(request_id = self.id(), callables = count, "dispatching request");

        match context {
            // Resolved contexts are never `Default`.
            ExecutionContext::Immediate | ExecutionContext::Default => {
                *self.inner.deferred.lock() = Some(batch);
                drop(handle);
                self.run_deferred();
            }
            ExecutionContext::FrameBoundary => {
                *self.inner.deferred.lock() = Some(batch);
                drop(handle);
                let request = self.clone();
                engine.frame_boundary_actions.push(Box::new(move || {
                    request.run_deferred();
                }));
            }
            ExecutionContext::WorkerPool => {
                let latch = CountdownLatch::new(count);
                *handle = ExecutionHandle::WorkerLatch(latch.clone());
                drop(handle);
                for callable in batch {
                    let request = self.clone();
                    let latch = latch.clone();
                    engine.workers.execute(Box::new(move || {
                        request.invoke(callable);
                        latch.count_down();
                    }));
                }
            }
            ExecutionContext::Chained => {
                if engine.is_owner_thread() {
                    *handle = ExecutionHandle::ScheduledChain(self.schedule_chained(&engine, batch));
                } else {
                    // Chained scheduling belongs to the coordinator's thread.
                    *self.inner.deferred.lock() = Some(batch);
                    drop(handle);
                    let request = self.clone();
                    engine.main_thread_actions.push(Box::new(move || {
                        request.dispatch_deferred_chained();
                    }));
                }
            }
        }

        Ok(())
    }

    /// Execute with the engine's default context.
    pub fn execute_default(&self) -> Result<(), EngineError> {
        self.execute(ExecutionContext::Default)
    }

    /// Synchronously join whatever the last `execute` produced.
    ///
    /// This is a join, not a cancel: already-dispatched callables run to
    /// completion. Batches still waiting for a frame boundary or for the
    /// coordinator thread are run or scheduled here. Posted results are kept.
    pub fn complete(&self) {
        let context = {
            let _published = self.inner.handle.lock();
            self.context()
        };

        match context {
            ExecutionContext::Default => {
                let discarded = std::mem::take(&mut *self.inner.callables.lock()).len();
                if discarded > 0 {
                    tracing::warn!(
                        request_id = self.id(),
                        discarded,
                        "completing a request that was never executed; queued callables dropped"
                    );
                }
            }
            ExecutionContext::Immediate | ExecutionContext::FrameBoundary => {
                self.run_deferred();
            }
            ExecutionContext::WorkerPool => {}
            ExecutionContext::Chained => self.dispatch_deferred_chained(),
        }

        let joinable = self.inner.handle.lock().clone();
        joinable.join();

        self.mark_started();
        self.inner.in_flight.store(0, Ordering::SeqCst);
        self.inner.callables.lock().clear();
        *self.inner.handle.lock() = ExecutionHandle::None;
    }

    /// Run the deferred batch, if this caller is the one to claim it.
    fn run_deferred(&self) -> bool {
        let mut slot = self.inner.deferred.lock();
        match slot.take() {
            Some(batch) => {
                for callable in batch {
                    self.invoke(callable);
                }
                true
            }
            None => false,
        }
    }

    fn dispatch_deferred_chained(&self) {
        let mut handle = self.inner.handle.lock();
        let mut slot = self.inner.deferred.lock();
        let Some(batch) = slot.take() else { return };

        match self.engine() {
            Ok(engine) => {
                *handle = ExecutionHandle::ScheduledChain(self.schedule_chained(&engine, batch));
            }
            Err(_) => {
                tracing::warn!(request_id = self.id(), "engine dropped before chained dispatch; running inline");
                for callable in batch {
                    self.invoke(callable);
                }
            }
        }
    }

    fn schedule_chained(&self, engine: &EngineContext, batch: Vec<Callable<T>>) -> Vec<TaskHandle> {
        let parallelism = engine.max_parallelism();
        batch
            .into_iter()
            .map(|callable| {
                let request = self.clone();
                engine
                    .chains
                    .schedule(Box::new(move || request.invoke(callable)), parallelism)
            })
            .collect()
    }

    /// Run one callable and post exactly one result for it.
    ///
    /// A callable that panics, or returns `Outcome::None`, is recorded as
    /// `Outcome::Error` so the in-flight count always reaches zero.
    fn invoke(&self, callable: Callable<T>) {
        let engine = self.engine().ok();

        let outcome = {
            let _executing = engine.as_ref().map(|e| e.enter_callable());
            match panic::catch_unwind(AssertUnwindSafe(move || callable(self))) {
                Ok(Outcome::None) => {
                    tracing::error!(request_id = self.id(), "callable returned no result; recording as error");
                    Outcome::Error
                }
                Ok(outcome) => outcome,
                Err(payload) => {
                    tracing::error!(
                        request_id = self.id(),
                        panic = %panic_message(payload.as_ref()),
                        "callable panicked; recording as error"
                    );
                    Outcome::Error
                }
            }
        };

        if outcome.is_error() {
            if let Some(engine) = &engine {
                EngineCounters::bump(&engine.counters.callable_failures);
            }
            telemetry::record_callable_failure(self.context());
        }

        self.inner.results.lock().push(outcome);
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: Default + Send + 'static> Tracked for Request<T> {
    fn tracked_id(&self) -> u64 {
        self.id()
    }

    fn is_started(&self) -> bool {
        self.started()
    }

    fn is_completed(&self) -> bool {
        self.completed()
    }

    fn force_complete(&self) {
        self.complete();
    }

    fn age_threshold(&self) -> u64 {
        self.max_age()
    }
}

/// Erase a request for the in-flight registry.
pub(crate) fn tracked<T: Default + Send + 'static>(request: &Request<T>) -> Arc<dyn Tracked> {
    Arc::new(request.clone())
}
