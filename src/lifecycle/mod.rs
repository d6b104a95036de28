//! Lifecycle coordination: the tick loop, request aging and the shutdown
//! drain protocol.

mod clock;
mod collaborator;
mod condition;
mod coordinator;
mod registry;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::Collaborator;
pub use condition::{
    FrameCountCondition, ShutdownCondition, SimSecondsCondition, TickSnapshot, WallSecondsCondition,
};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use registry::{InFlightRegistry, Tracked};
pub use state::LifecycleState;
