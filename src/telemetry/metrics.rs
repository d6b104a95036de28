//! Counters published through the `metrics` facade.
//!
//! Without an installed recorder these are no-ops.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::request::ExecutionContext;

pub const REQUESTS_CREATED: &str = "deferred_requests_created_total";
pub const REQUESTS_RECYCLED: &str = "deferred_requests_recycled_total";
pub const FORCED_COMPLETIONS: &str = "deferred_forced_completions_total";
pub const CALLABLE_FAILURES: &str = "deferred_callable_failures_total";
pub const REGISTRY_SIZE: &str = "deferred_in_flight_registry_size";

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_CREATED, "Requests checked out of the pool");
    describe_counter!(REQUESTS_RECYCLED, "Requests returned to the pool");
    describe_counter!(FORCED_COMPLETIONS, "Requests joined by aging or drain");
    describe_counter!(CALLABLE_FAILURES, "Callables that panicked or reported an error");
    describe_gauge!(REGISTRY_SIZE, "Requests currently tracked for aging");
}

pub fn record_request_created() {
    counter!(REQUESTS_CREATED).increment(1);
}

pub fn record_request_recycled() {
    counter!(REQUESTS_RECYCLED).increment(1);
}

/// `reason` is `aged` or `drain`.
pub fn record_forced_completions(reason: &'static str, count: usize) {
    if count > 0 {
        counter!(FORCED_COMPLETIONS, "reason" => reason).increment(count as u64);
    }
}

pub fn record_callable_failure(context: ExecutionContext) {
    counter!(CALLABLE_FAILURES, "context" => context.as_str()).increment(1);
}

pub fn record_registry_size(size: usize) {
    gauge!(REGISTRY_SIZE).set(size as f64);
}
