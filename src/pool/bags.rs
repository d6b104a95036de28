//! Type-keyed bags of idle, reset requests.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::context::{EngineContext, EngineCounters};
use crate::error::EngineError;
use crate::request::Request;
use crate::telemetry;

/// Type-erased view of one bag.
trait IdleBag: Send + Sync {
    fn idle(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

struct Bag<T> {
    idle: SegQueue<Request<T>>,
}

impl<T: Send + 'static> IdleBag for Bag<T> {
    fn idle(&self) -> usize {
        self.idle.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Recycles `Request<T>` instances, one lock-free bag per payload type.
///
/// Bags are created lazily on first use of a type and live for as long as
/// the pool does. Only completed requests are accepted back.
pub struct RequestPool {
    bags: DashMap<TypeId, Arc<dyn IdleBag>>,
    outstanding: AtomicUsize,
}

impl RequestPool {
    pub(crate) fn new() -> Self {
        Self {
            bags: DashMap::new(),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn bag<T: Send + 'static>(&self) -> Arc<dyn IdleBag> {
        self.bags
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(Bag::<T> { idle: SegQueue::new() }))
            .clone()
    }

    /// Pop and reset an idle instance, or build a fresh one.
    pub(crate) fn checkout<T: Default + Send + 'static>(&self, engine: &Arc<EngineContext>) -> Request<T> {
        let bag = self.bag::<T>();
        let recycled = bag
            .as_any()
            .downcast_ref::<Bag<T>>()
            .and_then(|bag| bag.idle.pop());

        let request = match recycled {
            Some(request) => {
                request.reset();
                request
            }
            None => Request::new(Arc::downgrade(engine)),
        };

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        request
    }

    /// Return a completed request to its bag.
    pub fn recycle<T: Default + Send + 'static>(&self, request: &Request<T>) -> Result<(), EngineError> {
        if !request.completed() {
            return Err(EngineError::RecycleInFlight { id: request.id() });
        }

        let bag = self.bag::<T>();
        match bag.as_any().downcast_ref::<Bag<T>>() {
            Some(bag) => bag.idle.push(request.clone()),
            None => tracing::error!(request_id = request.id(), "pool bag type mismatch; dropping request"),
        }

        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        telemetry::record_request_recycled();
        Ok(())
    }

    /// Idle instances of `Request<T>` waiting for reuse.
    pub fn idle_count<T: Send + 'static>(&self) -> usize {
        self.bags
            .get(&TypeId::of::<T>())
            .map(|bag| bag.idle())
            .unwrap_or(0)
    }

    /// Idle instances across every payload type.
    pub fn total_idle(&self) -> usize {
        self.bags.iter().map(|bag| bag.idle()).sum()
    }

    /// Requests handed out and not yet recycled.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("types", &self.bags.len())
            .field("idle", &self.total_idle())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Check out a request, give it a fresh id and register it for aging.
pub(crate) fn acquire<T: Default + Send + 'static>(engine: &Arc<EngineContext>) -> Request<T> {
    let request = engine.pool.checkout::<T>(engine);
    request.assign_id(engine.next_request_id());
    engine
        .registry
        .register(crate::request::tracked(&request), engine.frame());
    EngineCounters::bump(&engine.counters.created);
    telemetry::record_request_created();
    request
}
