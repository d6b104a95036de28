//! Logging, spans and metrics for the engine.
//!
//! Everything here goes through the `tracing` and `metrics` facades; the
//! host decides where output ends up.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    describe_metrics, record_callable_failure, record_forced_completions, record_registry_size,
    record_request_created, record_request_recycled, CALLABLE_FAILURES, FORCED_COMPLETIONS,
    REGISTRY_SIZE, REQUESTS_CREATED, REQUESTS_RECYCLED,
};
pub use spans::{drain_span, request_span, tick_span};
