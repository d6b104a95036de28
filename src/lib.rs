//! Deferred request execution runtime.
//!
//! A request carries a payload and a batch of callables. `execute` dispatches
//! the batch under one of four contexts and `complete` joins it:
//!
//! - **Immediate**: in enqueue order, on the calling thread.
//! - **FrameBoundary**: in enqueue order, at the coordinator's next
//!   frame-boundary phase.
//! - **WorkerPool**: every callable submitted independently to the worker
//!   pool.
//! - **Chained**: every callable queued behind a slot of a shared ring, so at
//!   most `max_parallelism` chained callables run at once process-wide.
//!
//! Requests are recycled through a type-keyed pool. The [`Coordinator`] owns
//! the engine, is ticked once per host frame, force-completes requests that
//! outlive their age threshold, and drains all outstanding work on shutdown.
//!
//! ```no_run
//! use deferred_runtime::{Coordinator, EngineConfig, ExecutionContext, Outcome};
//!
//! let coordinator = Coordinator::new(EngineConfig::default())?;
//! let request = coordinator.create_request::<Vec<u32>>()?;
//! for n in 0..4 {
//!     request.enqueue(move |r| {
//!         r.data().push(n);
//!         Outcome::Completed
//!     })?;
//! }
//! request.execute(ExecutionContext::WorkerPool)?;
//! request.complete();
//! assert!(request.completed() && !request.error());
//! # Ok::<(), deferred_runtime::EngineError>(())
//! ```

pub mod cli;
pub mod config;
mod context;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod request;
pub mod scheduler;
pub mod telemetry;

pub use config::{EffectiveConfig, EngineConfig};
pub use context::Action;
pub use error::EngineError;
pub use lifecycle::{
    Clock, Collaborator, Coordinator, CoordinatorStats, LifecycleState, ManualClock, ShutdownCondition,
    SystemClock,
};
pub use pool::{PooledRequest, RequestPool};
pub use request::{dont_care, Callable, ExecutionContext, ExecutionHandle, Outcome, Request};
