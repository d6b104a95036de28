//! Span helpers.

use tracing::{debug_span, info_span, Span};

use crate::request::ExecutionContext;

/// Span covering the dispatch of one request.
pub fn request_span(request_id: u64, context: ExecutionContext) -> Span {
    debug_span!("dispatch", request_id, context = %context)
}

/// Span covering one coordinator tick.
pub fn tick_span(frame: u64) -> Span {
    debug_span!("tick", frame)
}

/// Span covering the shutdown drain.
pub fn drain_span(session_id: &str) -> Span {
    info_span!("drain", session_id = %session_id, forced = tracing::field::Empty)
}
