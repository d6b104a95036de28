//! Requests: a payload plus an ordered batch of callables, dispatched under
//! one of four execution contexts and joined with `complete`.

mod body;
mod dispatch;
mod handle;
mod outcome;

pub use body::{dont_care, Callable, Request};
pub(crate) use dispatch::tracked;
pub use handle::{CountdownLatch, ExecutionHandle};
pub use outcome::{ExecutionContext, Outcome};
