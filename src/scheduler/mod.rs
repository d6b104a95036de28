//! Execution substrates for the parallel dispatch strategies.
//!
//! The unbounded worker pool runs independent tasks; the chain scheduler
//! layers a fixed-size ring of dependency chains over the same pool to cap
//! how many chained tasks run at once.

mod chain;
mod worker_pool;

pub use chain::{ChainScheduler, TaskHandle};
pub use worker_pool::{PoolError, Task, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
