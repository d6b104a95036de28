//! In-flight request tracking for aging and drain.
//!
//! The registry maps each live request to the tick it was created on. It is
//! bookkeeping only: results never depend on it.

use std::sync::Arc;

use dashmap::DashMap;

/// Type-erased view of a request, as seen by the registry.
pub trait Tracked: Send + Sync {
    fn tracked_id(&self) -> u64;
    fn is_started(&self) -> bool;
    fn is_completed(&self) -> bool;
    /// Join the request synchronously.
    fn force_complete(&self);
    /// Per-request age threshold in ticks, 0 if unset.
    fn age_threshold(&self) -> u64;
}

struct Entry {
    created_at: u64,
    request: Arc<dyn Tracked>,
}

/// Concurrent map of live requests to their creation tick.
#[derive(Default)]
pub struct InFlightRegistry {
    entries: DashMap<u64, Entry>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request: Arc<dyn Tracked>, tick: u64) {
        self.entries.insert(
            request.tracked_id(),
            Entry {
                created_at: tick,
                request,
            },
        );
    }

    pub fn remove(&self, id: u64) {
        self.entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creation tick of a registered request.
    pub fn created_at(&self, id: u64) -> Option<u64> {
        self.entries.get(&id).map(|e| e.created_at)
    }

    /// Copy out the current entries.
    ///
    /// `force_complete` can run callables that create or dispose requests,
    /// which touches this map; iterating while holding shard locks would
    /// deadlock.
    fn snapshot(&self) -> Vec<(u64, Arc<dyn Tracked>)> {
        self.entries
            .iter()
            .map(|e| (e.created_at, e.request.clone()))
            .collect()
    }

    /// Force-complete every started request whose age reached its threshold,
    /// then forget requests that have completed. Returns the number forced.
    pub fn age(&self, now: u64, default_max_age: u64) -> usize {
        let mut forced = 0;
        for (created_at, request) in self.snapshot() {
            let max_age = match request.age_threshold() {
                0 => default_max_age,
                own => own,
            };
            if max_age == 0 || !request.is_started() || request.is_completed() {
                continue;
            }
            if now.saturating_sub(created_at) >= max_age {
                tracing::debug!(
                    request_id = request.tracked_id(),
                    age = now - created_at,
                    max_age,
                    "forcing completion of aged request"
                );
                request.force_complete();
                forced += 1;
            }
        }
        self.retain_incomplete();
        forced
    }

    /// Force-complete every registered request, including ones registered
    /// while draining, until the registry is empty. Returns the number forced.
    pub fn drain(&self) -> usize {
        let mut forced = 0;
        loop {
            let pending = self.snapshot();
            if pending.is_empty() {
                return forced;
            }
            for (_, request) in pending {
                if !request.is_completed() {
                    request.force_complete();
                    forced += 1;
                }
                self.remove(request.tracked_id());
            }
        }
    }

    fn retain_incomplete(&self) {
        self.entries.retain(|_, e| !e.request.is_completed());
    }
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fake {
        id: u64,
        started: bool,
        completed: AtomicBool,
        max_age: u64,
        forced: AtomicUsize,
    }

    impl Fake {
        fn new(id: u64, started: bool, max_age: u64) -> Arc<Self> {
            Arc::new(Self {
                id,
                started,
                completed: AtomicBool::new(false),
                max_age,
                forced: AtomicUsize::new(0),
            })
        }
    }

    impl Tracked for Fake {
        fn tracked_id(&self) -> u64 {
            self.id
        }
        fn is_started(&self) -> bool {
            self.started
        }
        fn is_completed(&self) -> bool {
            self.completed.load(Ordering::SeqCst)
        }
        fn force_complete(&self) {
            self.forced.fetch_add(1, Ordering::SeqCst);
            self.completed.store(true, Ordering::SeqCst);
        }
        fn age_threshold(&self) -> u64 {
            self.max_age
        }
    }

    #[test]
    fn test_age_respects_threshold() {
        let registry = InFlightRegistry::new();
        let req = Fake::new(1, true, 3);
        registry.register(req.clone(), 10);

        assert_eq!(registry.age(12, 0), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.age(13, 0), 1);
        assert_eq!(req.forced.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_age_skips_unstarted_and_disabled() {
        let registry = InFlightRegistry::new();
        let unstarted = Fake::new(1, false, 1);
        let no_limit = Fake::new(2, true, 0);
        registry.register(unstarted.clone(), 0);
        registry.register(no_limit.clone(), 0);

        assert_eq!(registry.age(100, 0), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_default_threshold_applies_without_override() {
        let registry = InFlightRegistry::new();
        registry.register(Fake::new(1, true, 0), 0);
        assert_eq!(registry.age(4, 5), 0);
        assert_eq!(registry.age(5, 5), 1);
    }

    #[test]
    fn test_drain_forces_everything() {
        let registry = InFlightRegistry::new();
        let a = Fake::new(1, true, 0);
        let b = Fake::new(2, false, 0);
        registry.register(a.clone(), 0);
        registry.register(b.clone(), 0);

        assert_eq!(registry.drain(), 2);
        assert!(registry.is_empty());
        assert!(a.is_completed() && b.is_completed());
    }
}
