//! Join targets produced by dispatch.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::scheduler::TaskHandle;

/// Countdown latch released once `count_down` has been called `n` times.
#[derive(Clone)]
pub struct CountdownLatch {
    inner: Arc<LatchInner>,
}

struct LatchInner {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(LatchInner {
                remaining: Mutex::new(count),
                released: Condvar::new(),
            }),
        }
    }

    /// Signal one unit of work as finished.
    pub fn count_down(&self) {
        let mut remaining = self.inner.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.inner.released.notify_all();
        }
    }

    /// Remaining signals before release.
    pub fn count(&self) -> usize {
        *self.inner.remaining.lock()
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut remaining = self.inner.remaining.lock();
        while *remaining > 0 {
            self.inner.released.wait(&mut remaining);
        }
    }
}

impl std::fmt::Debug for CountdownLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownLatch").field("remaining", &self.count()).finish()
    }
}

/// What `Request::complete` joins on, selected by the dispatch strategy.
#[derive(Debug, Clone, Default)]
pub enum ExecutionHandle {
    /// Nothing asynchronous outstanding.
    #[default]
    None,
    /// Worker-pool dispatch: released when every callable has posted.
    WorkerLatch(CountdownLatch),
    /// Chained dispatch: one handle per scheduled callable.
    ScheduledChain(Vec<TaskHandle>),
}

impl ExecutionHandle {
    /// Block until everything behind this handle has finished.
    pub fn join(&self) {
        match self {
            Self::None => {}
            Self::WorkerLatch(latch) => latch.wait(),
            Self::ScheduledChain(handles) => TaskHandle::wait_all(handles),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_latch_releases_after_all_signals() {
        let latch = CountdownLatch::new(3);
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.count_down())
            })
            .collect();

        latch.wait();
        assert_eq!(latch.count(), 0);
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_zero_latch_does_not_block() {
        let latch = CountdownLatch::new(0);
        latch.wait();
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_none_handle_join_is_noop() {
        let handle = ExecutionHandle::default();
        assert!(handle.is_none());
        handle.join();
    }
}
