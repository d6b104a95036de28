//! Bounded-parallelism chain scheduling.
//!
//! A process-wide ring of "last issued" task handles, one per slot. Each new
//! task depends on the handle currently occupying the slot at the cursor and
//! replaces it, so at most `slots` tasks scheduled through the ring can run at
//! once, regardless of which request issued them.
//!
//! Dependencies are continuations, not blocking waits: a dependent task is
//! handed to the worker pool only when its predecessor finishes, so workers
//! never park on an unfinished dependency.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::worker_pool::{Task, WorkerPool};

/// Completion handle for one scheduled task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    state: Mutex<HandleState>,
    finished: Condvar,
}

#[derive(Default)]
struct HandleState {
    done: bool,
    continuations: Vec<Task>,
}

impl TaskHandle {
    fn pending() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(HandleState::default()),
                finished: Condvar::new(),
            }),
        }
    }

    /// Returns true once the task has run to completion.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done
    }

    /// Block until the task has finished.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.done {
            self.inner.finished.wait(&mut state);
        }
    }

    /// Block until every handle has finished.
    pub fn wait_all(handles: &[TaskHandle]) {
        for handle in handles {
            handle.wait();
        }
    }

    /// Run `continuation` once this task finishes, immediately if it already has.
    fn on_finish(&self, continuation: Task) {
        let mut state = self.inner.state.lock();
        if state.done {
            drop(state);
            continuation();
        } else {
            state.continuations.push(continuation);
        }
    }

    fn finish(&self) {
        let continuations = {
            let mut state = self.inner.state.lock();
            state.done = true;
            std::mem::take(&mut state.continuations)
        };
        self.inner.finished.notify_all();
        for continuation in continuations {
            continuation();
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("done", &self.is_done()).finish()
    }
}

struct Ring {
    slots: Vec<Option<TaskHandle>>,
    cursor: usize,
}

impl Ring {
    /// Lazily follow a max-parallelism change, keeping the overlapping slots.
    fn resize(&mut self, size: usize) {
        if size == self.slots.len() {
            return;
        }
        let mut slots: Vec<Option<TaskHandle>> = vec![None; size];
        let keep = size.min(self.slots.len());
        slots[..keep].clone_from_slice(&self.slots[..keep]);
        self.slots = slots;
        self.cursor = if size == 0 { 0 } else { self.cursor % size };
        tracing::debug!(slots = size, cursor = self.cursor, "chain ring resized");
    }
}

/// Round-robin ring of dependency chains shared by all chained requests.
pub struct ChainScheduler {
    pool: Arc<WorkerPool>,
    ring: Mutex<Ring>,
}

impl ChainScheduler {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            ring: Mutex::new(Ring {
                slots: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Schedule `task` behind the slot at the cursor.
    ///
    /// With `max_parallelism == 0` the task is scheduled with no dependency.
    pub fn schedule(&self, task: Task, max_parallelism: usize) -> TaskHandle {
        let handle = TaskHandle::pending();

        let dependency = {
            let mut ring = self.ring.lock();
            ring.resize(max_parallelism);
            if max_parallelism == 0 {
                None
            } else {
                let cursor = ring.cursor;
                let previous = ring.slots[cursor].replace(handle.clone());
                ring.cursor = (cursor + 1) % max_parallelism;
                previous
            }
        };

        let job: Task = {
            let handle = handle.clone();
            Box::new(move || {
                task();
                handle.finish();
            })
        };

        match dependency {
            Some(previous) if !previous.is_done() => {
                let pool = self.pool.clone();
                previous.on_finish(Box::new(move || pool.execute(job)));
            }
            _ => self.pool.execute(job),
        }

        handle
    }

    /// Current number of ring slots.
    pub fn slot_count(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Current round-robin cursor.
    pub fn cursor(&self) -> usize {
        self.ring.lock().cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkerPoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn scheduler(threads: usize) -> ChainScheduler {
        let pool = WorkerPool::new(WorkerPoolConfig {
            num_threads: threads,
            ..Default::default()
        })
        .unwrap();
        ChainScheduler::new(Arc::new(pool))
    }

    fn tracked_task(current: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Task {
        let current = current.clone();
        let peak = peak.clone();
        Box::new(move || {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            current.fetch_sub(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_single_slot_serializes_tasks() {
        let chains = scheduler(4);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle> = (0..20)
            .map(|_| chains.schedule(tracked_task(&current, &peak), 1))
            .collect();
        TaskHandle::wait_all(&handles);

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(TaskHandle::is_done));
    }

    #[test]
    fn test_slots_cap_concurrency() {
        let chains = scheduler(8);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle> = (0..40)
            .map(|_| chains.schedule(tracked_task(&current, &peak), 2))
            .collect();
        TaskHandle::wait_all(&handles);

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_zero_parallelism_has_no_dependency() {
        let chains = scheduler(2);
        let (tx, rx) = std::sync::mpsc::channel::<()>();

        // The first task blocks until the second one has run. With a chain
        // dependency this would never finish.
        let first = chains.schedule(
            Box::new(move || {
                rx.recv_timeout(Duration::from_secs(5)).unwrap();
            }),
            0,
        );
        let second = chains.schedule(
            Box::new(move || {
                tx.send(()).unwrap();
            }),
            0,
        );

        second.wait();
        first.wait();
        assert_eq!(chains.slot_count(), 0);
    }

    #[test]
    fn test_resize_clamps_cursor() {
        let chains = scheduler(2);
        let handles: Vec<TaskHandle> = (0..3).map(|_| chains.schedule(Box::new(|| {}), 4)).collect();
        assert_eq!(chains.slot_count(), 4);
        assert_eq!(chains.cursor(), 3);

        let more = chains.schedule(Box::new(|| {}), 2);
        assert_eq!(chains.slot_count(), 2);
        // cursor 3 % 2 = 1, then advanced past the slot just used
        assert_eq!(chains.cursor(), 0);

        TaskHandle::wait_all(&handles);
        more.wait();
    }

    #[test]
    fn test_wait_on_finished_handle_returns() {
        let chains = scheduler(1);
        let handle = chains.schedule(Box::new(|| {}), 1);
        handle.wait();
        handle.wait();
        assert!(handle.is_done());
    }
}
