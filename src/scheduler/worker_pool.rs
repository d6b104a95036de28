//! Unbounded worker pool backing the parallel dispatch strategies.
//!
//! A fixed set of named worker threads pull boxed tasks from a single FIFO
//! injector queue. The queue is unbounded: `submit` never rejects for
//! capacity, only after shutdown. Tasks queued before shutdown still run
//! before the workers exit.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// A task to be executed by the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads (0 = auto-detect).
    pub num_threads: usize,
    /// Thread stack size in bytes (0 = default).
    pub stack_size: usize,
    /// Thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: 0, // Auto-detect
            stack_size: 0,
            thread_name_prefix: "deferred-worker".to_string(),
        }
    }
}

/// Statistics for worker pool activity.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct WorkerPoolStats {
    pub total_tasks_executed: u64,
    pub task_panics: u64,
    pub avg_exec_time_us: u64,
    pub queued: usize,
    pub threads_active: usize,
    pub threads_idle: usize,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
    stats: Mutex<WorkerPoolStats>,
}

/// Fixed-size pool of worker threads sharing one FIFO queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Create a new pool and spawn its workers.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        let num_threads = if config.num_threads == 0 {
            num_cpus::get().max(1)
        } else {
            config.num_threads
        };

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            stats: Mutex::new(WorkerPoolStats::default()),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id));
            if config.stack_size > 0 {
                builder = builder.stack_size(config.stack_size);
            }
            let shared_clone = shared.clone();
            match builder.spawn(move || worker_loop(&shared_clone)) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Release the workers that did start before bailing out.
                    shared.shutdown.store(true, Ordering::SeqCst);
                    shared.available.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::ThreadSpawnFailed(e.to_string()));
                }
            }
        }

        tracing::debug!(threads = num_threads, "worker pool started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            num_threads,
        })
    }

    /// Submit a task to the pool.
    pub fn submit(&self, task: Task) -> Result<(), PoolError> {
        self.try_submit(task).map_err(|_| PoolError::PoolShutdown)
    }

    /// Submit a task, running it on the calling thread if the pool has shut down.
    ///
    /// Work handed to the engine is never dropped, even while the pool is
    /// being torn down.
    pub fn execute(&self, task: Task) {
        if let Err(task) = self.try_submit(task) {
            tracing::warn!("worker pool shut down; running task inline");
            task();
        }
    }

    fn try_submit(&self, task: Task) -> Result<(), Task> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(task);
        }
        self.shared.queue.lock().push_back(task);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Get current statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.queued = self.shared.queue.lock().len();
        stats.threads_active = self.shared.active.load(Ordering::SeqCst);
        stats.threads_idle = self.num_threads.saturating_sub(stats.threads_active);
        stats
    }

    /// Get number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Check if pool is shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Signal shutdown (does not wait for threads).
    pub fn signal_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
    }

    /// Signal shutdown and wait for all workers to drain the queue and exit.
    pub fn join(&self) {
        self.signal_shutdown();
        let current = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            // The last owner may be a task running on one of our own workers.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };

        let Some(task) = task else { return };

        shared.active.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(task));
        let exec_us = start.elapsed().as_micros() as u64;
        shared.active.fetch_sub(1, Ordering::SeqCst);

        let mut stats = shared.stats.lock();
        stats.total_tasks_executed += 1;
        if outcome.is_err() {
            stats.task_panics += 1;
            tracing::error!("worker task panicked");
        }
        // Rolling average of execution time
        if stats.avg_exec_time_us == 0 {
            stats.avg_exec_time_us = exec_us;
        } else {
            stats.avg_exec_time_us = (stats.avg_exec_time_us * 9 + exec_us) / 10;
        }
    }
}

/// Errors for worker pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    PoolShutdown,

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawnFailed(String),
}
