//! External subsystems that take part in shutdown.

/// A subsystem notified of shutdown that can hold termination open while it
/// finishes its own work.
pub trait Collaborator: Send + Sync {
    fn name(&self) -> &str;

    /// Called on registration. Returning false rejects the registration.
    fn initialize(&self) -> bool {
        true
    }

    /// Fired exactly once, during the drain phase.
    fn shutdown_notification(&self);

    /// While true after the final flush, termination waits (up to the
    /// shutdown timeout).
    fn work_in_progress(&self) -> bool {
        false
    }
}
