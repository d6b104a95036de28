//! Scoped acquisition of pooled requests.

use std::ops::Deref;

use crate::context::EngineCounters;
use crate::request::Request;

/// A request checked out of the pool.
///
/// The request goes back to the pool exactly once: on `dispose` or on drop,
/// whichever comes first. Disposing a request that has not completed joins
/// it first, so the pool never holds in-flight work.
pub struct PooledRequest<T: Default + Send + 'static> {
    request: Request<T>,
}

impl<T: Default + Send + 'static> PooledRequest<T> {
    pub(crate) fn new(request: Request<T>) -> Self {
        Self { request }
    }

    /// Hand the request back to the pool.
    pub fn dispose(self) {
        drop(self);
    }

    /// A shareable handle to the underlying request.
    ///
    /// Handles outlive the guard but must not be used after it is disposed:
    /// the instance may already belong to another checkout.
    pub fn handle(&self) -> Request<T> {
        self.request.clone()
    }

    fn release(&self) {
        if !self.request.mark_disposed() {
            return;
        }

        if !self.request.completed() {
            tracing::warn!(
                request_id = self.request.id(),
                in_flight = self.request.in_flight(),
                "disposing incomplete request; joining before recycle"
            );
            self.request.complete();
        }

        let Ok(engine) = self.request.engine() else {
            return;
        };
        engine.registry.remove(self.request.id());
        match engine.pool.recycle(&self.request) {
            Ok(()) => EngineCounters::bump(&engine.counters.recycled),
            Err(e) => tracing::warn!(error = %e, "request not recycled"),
        }
    }
}

impl<T: Default + Send + 'static> Deref for PooledRequest<T> {
    type Target = Request<T>;

    fn deref(&self) -> &Request<T> {
        &self.request
    }
}

impl<T: Default + Send + 'static> Drop for PooledRequest<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Default + Send + 'static> std::fmt::Debug for PooledRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledRequest").field(&self.request).finish()
    }
}
