//! Engine error types.
//!
//! State errors are fatal to the calling operation and surface synchronously.
//! Callable failures are never errors here: they are recorded as
//! [`Outcome::Error`](crate::request::Outcome) results on the request.

use thiserror::Error;

use crate::scheduler::PoolError;

/// Errors returned by request, pool and coordinator operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("create_request called after shutdown has completed")]
    ShutdownComplete,

    #[error("Unsupported execution context: {0}")]
    UnsupportedContext(String),

    #[error("Request {id} has already been dispatched; enqueue is not allowed")]
    AlreadyDispatched { id: u64 },

    #[error("Request {id} is still in flight and cannot be recycled")]
    RecycleInFlight { id: u64 },

    #[error("Coordinator owning this request has been dropped")]
    EngineDropped,

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

impl EngineError {
    /// Returns true if this error reflects caller misuse rather than engine state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyDispatched { .. } | Self::RecycleInFlight { .. } | Self::UnsupportedContext(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_error_classification() {
        assert!(EngineError::AlreadyDispatched { id: 1 }.is_caller_error());
        assert!(EngineError::UnsupportedContext("bogus".into()).is_caller_error());
        assert!(!EngineError::ShutdownComplete.is_caller_error());
        assert!(!EngineError::EngineDropped.is_caller_error());
    }

    #[test]
    fn test_display_includes_request_id() {
        let msg = EngineError::RecycleInFlight { id: 42 }.to_string();
        assert!(msg.contains("42"));
    }
}
